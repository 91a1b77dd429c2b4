//! Player identity and analysis result types.

use std::fmt;

use crate::error::ResolveError;

/// Cache key naming one player build.
///
/// URLs with a `player/<id>/` segment name a build by id, so every URL
/// variant of the same build (`/s/player/ABC123/player_ias.vflset/en_US/base.js`,
/// `https://host/s/player/ABC123/tv-player-ias.vflset/tv-player-ias.js`, ...)
/// maps to `ABC123` and is always downloaded from the canonical script path.
/// Other URLs are identified by the URL itself with query and fragment
/// removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlayerIdentity {
    Build(String),
    Url(String),
}

impl PlayerIdentity {
    pub fn from_url(player_url: &str) -> Result<Self, ResolveError> {
        let player_url = player_url.trim();
        if player_url.is_empty() {
            return Err(ResolveError::missing("player URL"));
        }

        if let Some(start) = player_url.find("player/") {
            let rest = &player_url[start + "player/".len()..];
            if let Some(end) = rest.find('/') {
                let id = &rest[..end];
                if is_build_id(id) {
                    return Ok(Self::Build(id.to_string()));
                }
            }
        }

        let base = player_url
            .split(['?', '#'])
            .next()
            .unwrap_or(player_url);
        Ok(Self::Url(base.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Build(id) | Self::Url(id) => id,
        }
    }

    /// Where to download this player from. Build ids resolve to the
    /// canonical script path whichever URL named them.
    pub fn script_url(&self) -> String {
        match self {
            Self::Build(id) => format!("/s/player/{}/player_ias.vflset/en_US/base.js", id),
            Self::Url(url) => url.clone(),
        }
    }
}

fn is_build_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transforms and timestamp recovered from one player build.
///
/// Each source is a JavaScript expression evaluating to a function that maps
/// one string to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub sig_transform_source: String,
    pub n_transform_source: String,
    /// The `signatureTimestamp` (sts) baked into this player build.
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_player_path() {
        let id = PlayerIdentity::from_url(
            "https://www.youtube.com/s/player/6182c448/player_ias.vflset/en_US/base.js",
        )
        .unwrap();
        assert_eq!(id.as_str(), "6182c448");

        let id = PlayerIdentity::from_url("https://example.com/player/ABC123/base.js").unwrap();
        assert_eq!(id.as_str(), "ABC123");
    }

    #[test]
    fn test_identity_shared_across_variants() {
        let ias = PlayerIdentity::from_url("/s/player/6182c448/player_ias.vflset/en_US/base.js");
        let tv = PlayerIdentity::from_url(
            "https://www.youtube.com/s/player/6182c448/tv-player-ias.vflset/tv-player-ias.js",
        );
        assert_eq!(ias.unwrap(), tv.unwrap());
    }

    #[test]
    fn test_identity_fallback_strips_query() {
        let a = PlayerIdentity::from_url("https://cdn.example.com/base.js?v=1").unwrap();
        let b = PlayerIdentity::from_url("https://cdn.example.com/base.js#top").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://cdn.example.com/base.js");
    }

    #[test]
    fn test_build_ids_use_canonical_script() {
        let official = PlayerIdentity::from_url(
            "https://www.youtube.com/s/player/ABC123/player_ias.vflset/en_US/base.js",
        )
        .unwrap();
        let elsewhere =
            PlayerIdentity::from_url("https://mirror.example/player/ABC123/x.js").unwrap();
        assert_eq!(official, elsewhere);
        assert_eq!(
            elsewhere.script_url(),
            "/s/player/ABC123/player_ias.vflset/en_US/base.js"
        );
    }

    #[test]
    fn test_odd_id_falls_back_to_url() {
        let id = PlayerIdentity::from_url("https://host/player/a?b=1/base.js").unwrap();
        assert_eq!(id, PlayerIdentity::Url("https://host/player/a".to_string()));
        assert_eq!(id.script_url(), "https://host/player/a");

        let a = PlayerIdentity::from_url("https://one.example/base.js").unwrap();
        let b = PlayerIdentity::from_url("https://two.example/base.js").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_rejects_blank() {
        let err = PlayerIdentity::from_url("   ").unwrap_err();
        assert!(err.is_client_error());
    }
}
