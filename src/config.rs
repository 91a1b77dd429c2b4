//! Service configuration read from the environment.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8001;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TRANSFORM_TIMEOUT_MS: u64 = 2000;
const DEFAULT_PLAYER_BASE_URL: &str = "https://www.youtube.com";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Runtime settings for the resolver and the HTTP server.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Upper bound on one player script download.
    pub fetch_timeout: Duration,
    /// Upper bound on a single transform invocation inside the sandbox.
    pub transform_timeout: Duration,
    /// Cached players expire after this long. `None` keeps them for the
    /// process lifetime.
    pub cache_ttl: Option<Duration>,
    pub cache_capacity: Option<u64>,
    /// Base used to resolve relative player URLs such as `/s/player/...`.
    pub player_base_url: String,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            transform_timeout: Duration::from_millis(DEFAULT_TRANSFORM_TIMEOUT_MS),
            cache_ttl: None,
            cache_capacity: None,
            player_base_url: DEFAULT_PLAYER_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: parse_var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT").unwrap_or(defaults.port),
            fetch_timeout: parse_var("PLAYER_FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            transform_timeout: parse_var("TRANSFORM_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.transform_timeout),
            cache_ttl: parse_var("PLAYER_CACHE_TTL_SECS").map(Duration::from_secs),
            cache_capacity: parse_var("PLAYER_CACHE_CAPACITY"),
            player_base_url: env::var("PLAYER_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.player_base_url),
            user_agent: env::var("USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8001);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8001");
        assert!(config.cache_ttl.is_none());
        assert!(config.cache_capacity.is_none());
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("PLAYER_DECRYPTER_TEST_PORT", "not-a-port") };
        assert_eq!(parse_var::<u16>("PLAYER_DECRYPTER_TEST_PORT"), None);
        unsafe { env::set_var("PLAYER_DECRYPTER_TEST_PORT", " 9000 ") };
        assert_eq!(parse_var::<u16>("PLAYER_DECRYPTER_TEST_PORT"), Some(9000));
    }
}
