//! Request and response shapes for the resolution endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResolveError;

pub const DEFAULT_SIGNATURE_KEY: &str = "sig";

/// The three resolution endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    DecryptSignature,
    GetSts,
    ResolveUrl,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::DecryptSignature => "/decrypt_signature",
            Self::GetSts => "/get_sts",
            Self::ResolveUrl => "/resolve_url",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A validated request, one variant per endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    DecryptSignature {
        player_url: String,
        encrypted_signature: String,
        n_param: String,
    },
    GetSts {
        player_url: String,
    },
    ResolveUrl {
        player_url: String,
        stream_url: String,
        encrypted_signature: Option<String>,
        signature_key: String,
        n_param: Option<String>,
    },
}

impl Request {
    /// Decode and validate a JSON body for `endpoint`.
    ///
    /// Unparsable JSON is a `MalformedRequest`; a missing or `null` required
    /// field is a `Validation` error, with `player_url` checked first.
    pub fn parse(endpoint: Endpoint, body: &[u8]) -> Result<Self, ResolveError> {
        let raw: RawBody = serde_json::from_slice(body)?;
        raw.validate(endpoint)
    }

    pub fn player_url(&self) -> &str {
        match self {
            Self::DecryptSignature { player_url, .. }
            | Self::GetSts { player_url }
            | Self::ResolveUrl { player_url, .. } => player_url,
        }
    }
}

/// Every field any endpoint accepts, as sent on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct RawBody {
    #[serde(default)]
    pub player_url: Option<String>,
    #[serde(default)]
    pub encrypted_signature: Option<String>,
    #[serde(default)]
    pub n_param: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub signature_key: Option<String>,
}

impl RawBody {
    /// Check the fields shared by every endpoint, before the path is known
    /// to be valid.
    pub fn require_player_url(&self) -> Result<&str, ResolveError> {
        self.player_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ResolveError::missing("player URL"))
    }

    pub fn validate(self, endpoint: Endpoint) -> Result<Request, ResolveError> {
        let player_url = self.require_player_url()?.to_string();

        match endpoint {
            Endpoint::DecryptSignature => Ok(Request::DecryptSignature {
                player_url,
                encrypted_signature: self
                    .encrypted_signature
                    .ok_or_else(|| ResolveError::missing("encrypted_signature"))?,
                n_param: self
                    .n_param
                    .ok_or_else(|| ResolveError::missing("n_param"))?,
            }),
            Endpoint::GetSts => Ok(Request::GetSts { player_url }),
            Endpoint::ResolveUrl => Ok(Request::ResolveUrl {
                player_url,
                stream_url: self
                    .stream_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| ResolveError::missing("stream_url"))?,
                encrypted_signature: self.encrypted_signature,
                signature_key: self
                    .signature_key
                    .filter(|key| !key.is_empty())
                    .unwrap_or_else(|| DEFAULT_SIGNATURE_KEY.to_string()),
                n_param: self.n_param,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptSignatureResponse {
    pub decrypted_signature: String,
    pub decrypted_n_sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStsResponse {
    pub sts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveUrlResponse {
    pub resolved_url: String,
}

/// Response body for a [`Request`], serialized as just the inner fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    DecryptSignature(DecryptSignatureResponse),
    GetSts(GetStsResponse),
    ResolveUrl(ResolveUrlResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER: &str = "https://www.youtube.com/s/player/ABC123/player_ias.vflset/en_US/base.js";

    #[test]
    fn test_parse_decrypt_signature() {
        let body = format!(
            r#"{{"encrypted_signature":"XYZ","n_param":"abc","player_url":"{PLAYER}"}}"#
        );
        let request = Request::parse(Endpoint::DecryptSignature, body.as_bytes()).unwrap();
        assert_eq!(
            request,
            Request::DecryptSignature {
                player_url: PLAYER.to_string(),
                encrypted_signature: "XYZ".to_string(),
                n_param: "abc".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_url_defaults() {
        let body = format!(r#"{{"stream_url":"https://host/v?n=abc","player_url":"{PLAYER}"}}"#);
        match Request::parse(Endpoint::ResolveUrl, body.as_bytes()).unwrap() {
            Request::ResolveUrl {
                signature_key,
                n_param,
                encrypted_signature,
                ..
            } => {
                assert_eq!(signature_key, "sig");
                assert_eq!(n_param, None);
                assert_eq!(encrypted_signature, None);
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_player_url_checked_first() {
        let err = Request::parse(Endpoint::DecryptSignature, br#"{"n_param":"abc"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Bad Request, missing player URL");
    }

    #[test]
    fn test_null_fields_are_missing() {
        let body = format!(
            r#"{{"encrypted_signature":null,"n_param":"abc","player_url":"{PLAYER}"}}"#
        );
        let err = Request::parse(Endpoint::DecryptSignature, body.as_bytes()).unwrap_err();
        assert!(matches!(err, ResolveError::Validation(ref f) if f == "encrypted_signature"));

        let body = format!(r#"{{"player_url":"{PLAYER}"}}"#);
        let err = Request::parse(Endpoint::ResolveUrl, body.as_bytes()).unwrap_err();
        assert!(matches!(err, ResolveError::Validation(ref f) if f == "stream_url"));
    }

    #[test]
    fn test_malformed_json() {
        let err = Request::parse(Endpoint::GetSts, b"player_url=x").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedRequest(_)));

        let err = Request::parse(Endpoint::GetSts, b"[1,2]").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedRequest(_)));
    }

    #[test]
    fn test_response_serializes_flat() {
        let response = Response::GetSts(GetStsResponse {
            sts: "19876".to_string(),
        });
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"sts":"19876"}"#
        );
    }
}
