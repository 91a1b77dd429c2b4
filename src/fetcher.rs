//! Downloads player scripts.
//!
//! Player URLs arrive either absolute
//! (`https://www.youtube.com/s/player/{id}/player_ias.vflset/en_US/base.js`)
//! or as the relative `jsUrl` found in watch pages (`/s/player/{id}/...`).
//! Relative ones are resolved against the configured base URL before fetching.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};
use url::Url;

use crate::config::Config;
use crate::error::ResolveError;

/// Source of raw player script text.
#[async_trait]
pub trait PlayerFetcher: Send + Sync {
    async fn fetch(&self, player_url: &str) -> Result<String, ResolveError>;
}

/// Fetches player scripts over HTTP.
pub struct HttpPlayerFetcher {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpPlayerFetcher {
    pub fn new(config: &Config) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .connect_timeout(config.fetch_timeout)
            .build()?;
        let base_url = Url::parse(&config.player_base_url).map_err(|e| {
            ResolveError::PlayerFetch(format!(
                "invalid player base URL {:?}: {}",
                config.player_base_url, e
            ))
        })?;

        Ok(Self {
            client,
            base_url,
            timeout: config.fetch_timeout,
        })
    }
}

#[async_trait]
impl PlayerFetcher for HttpPlayerFetcher {
    async fn fetch(&self, player_url: &str) -> Result<String, ResolveError> {
        let url = resolve_player_url(&self.base_url, player_url)?;
        let started = Instant::now();
        tracing::debug!("Fetching player script {}", url);

        let download = async {
            self.client
                .get(url.clone())
                .header(header::ACCEPT, "*/*")
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        };

        let body = tokio::time::timeout(self.timeout, download)
            .await
            .map_err(|_| {
                ResolveError::PlayerFetch(format!(
                    "timed out after {:?} fetching {}",
                    self.timeout, url
                ))
            })??;

        if body.trim().is_empty() {
            return Err(ResolveError::PlayerFetch(format!(
                "empty player script at {}",
                url
            )));
        }

        tracing::info!(
            "Player script fetched from {} ({} bytes in {:?})",
            url,
            body.len(),
            started.elapsed()
        );
        Ok(body)
    }
}

/// Turn a possibly relative player URL into an absolute one.
fn resolve_player_url(base: &Url, player_url: &str) -> Result<Url, ResolveError> {
    let player_url = player_url.trim();
    let resolved = if player_url.starts_with("//") {
        Url::parse(&format!("{}:{}", base.scheme(), player_url))
    } else {
        match Url::parse(player_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(player_url),
            Err(e) => Err(e),
        }
    };

    let url = resolved.map_err(|e| {
        ResolveError::PlayerFetch(format!("invalid player URL {:?}: {}", player_url, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ResolveError::PlayerFetch(format!(
            "unsupported player URL scheme {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.youtube.com").unwrap()
    }

    #[test]
    fn test_resolve_absolute_url() {
        let url = resolve_player_url(
            &base(),
            "https://www.youtube.com/s/player/6182c448/player_ias.vflset/en_US/base.js",
        )
        .unwrap();
        assert_eq!(url.path(), "/s/player/6182c448/player_ias.vflset/en_US/base.js");
    }

    #[test]
    fn test_resolve_relative_url() {
        let url = resolve_player_url(&base(), "/s/player/6182c448/player_ias.vflset/en_US/base.js")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.youtube.com/s/player/6182c448/player_ias.vflset/en_US/base.js"
        );
    }

    #[test]
    fn test_resolve_protocol_relative_url() {
        let url = resolve_player_url(&base(), "//cdn.example.com/player/x/base.js").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/player/x/base.js");
    }

    #[test]
    fn test_resolve_rejects_other_schemes() {
        let err = resolve_player_url(&base(), "file:///etc/passwd").unwrap_err();
        assert!(matches!(err, ResolveError::PlayerFetch(_)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_fetch_error() {
        let config = Config {
            fetch_timeout: Duration::from_millis(500),
            ..Config::default()
        };
        let fetcher = HttpPlayerFetcher::new(&config).unwrap();
        let err = fetcher
            .fetch("http://127.0.0.1:1/s/player/deadbeef/base.js")
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_fetch_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = Config {
            fetch_timeout: Duration::from_millis(300),
            ..Config::default()
        };
        let fetcher = HttpPlayerFetcher::new(&config).unwrap();
        let started = Instant::now();
        let err = fetcher
            .fetch(&format!("http://{addr}/s/player/deadbeef/base.js"))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::PlayerFetch(_)), "{err}");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }
}
