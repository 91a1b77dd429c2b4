//! Query rewriting for stream URLs.
//!
//! Stream URLs carry dozens of parameters whose exact encoding matters to the
//! CDN, so rewriting works on raw `key=value` segments: only the segments
//! whose key is replaced are re-encoded, everything else is copied verbatim
//! and stays in place. Keys that are not present yet are appended.

use url::Url;
use url::form_urlencoded;

use crate::error::ResolveError;

/// A parsed stream URL.
#[derive(Debug, Clone)]
pub struct StreamUrl {
    url: Url,
}

impl StreamUrl {
    pub fn parse(stream_url: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(stream_url.trim()).map_err(|e| {
            ResolveError::Resolution(format!("invalid stream URL {:?}: {}", stream_url, e))
        })?;
        Ok(Self { url })
    }

    /// Decoded value of the first `key` parameter.
    pub fn param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Set `key` to `value`, replacing every existing `key` segment in place
    /// or appending one.
    pub fn set_param(&mut self, key: &str, value: &str) {
        let encoded = format!("{}={}", encode(key), encode(value));
        let mut replaced = false;

        let mut segments: Vec<String> = Vec::new();
        for segment in self.url.query().unwrap_or("").split('&') {
            if segment.is_empty() {
                continue;
            }
            if segment_key(segment) == key {
                if !replaced {
                    segments.push(encoded.clone());
                    replaced = true;
                }
            } else {
                segments.push(segment.to_string());
            }
        }
        if !replaced {
            segments.push(encoded);
        }

        self.url.set_query(Some(&segments.join("&")));
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn into_string(self) -> String {
        self.url.into()
    }
}

fn encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

fn segment_key(segment: &str) -> String {
    let raw = segment.split('=').next().unwrap_or(segment);
    form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_lookup() {
        let url = StreamUrl::parse("https://host/videoplayback?n=abc&other=1&sp=sig").unwrap();
        assert_eq!(url.param("n"), Some("abc".to_string()));
        assert_eq!(url.param("sp"), Some("sig".to_string()));
        assert_eq!(url.param("missing"), None);
    }

    #[test]
    fn test_replace_keeps_order_and_appends() {
        let mut url = StreamUrl::parse("https://host/videoplayback?n=abc&other=1").unwrap();
        url.set_param("n", "cba");
        url.set_param("sig", "ZYX");
        assert_eq!(url.as_str(), "https://host/videoplayback?n=cba&other=1&sig=ZYX");
    }

    #[test]
    fn test_untouched_segments_are_verbatim() {
        let mut url = StreamUrl::parse(
            "https://rr1.example.com/videoplayback?mime=audio%2Fwebm&sparams=expire%2Cn&n=q1&lsig=AB%3D%3D",
        )
        .unwrap();
        url.set_param("n", "x/y=");
        assert_eq!(
            url.into_string(),
            "https://rr1.example.com/videoplayback?mime=audio%2Fwebm&sparams=expire%2Cn&n=x%2Fy%3D&lsig=AB%3D%3D"
        );
    }

    #[test]
    fn test_duplicate_keys_collapse_to_first_position() {
        let mut url = StreamUrl::parse("https://host/p?sig=a&x=1&sig=b").unwrap();
        url.set_param("sig", "c");
        assert_eq!(url.as_str(), "https://host/p?sig=c&x=1");
    }

    #[test]
    fn test_url_without_query() {
        let mut url = StreamUrl::parse("https://host/videoplayback").unwrap();
        url.set_param("signature", "s");
        assert_eq!(url.as_str(), "https://host/videoplayback?signature=s");
    }

    #[test]
    fn test_invalid_url() {
        let err = StreamUrl::parse("not a url").unwrap_err();
        assert!(matches!(err, ResolveError::Resolution(_)));
    }
}
