//! Camera URL normalization and validation
//!
//! Cameras are addressed by IPv4 literal only. Validation happens before any
//! network activity.

use crate::utils::error::{PipelineError, PipelineResult};
use regex::Regex;
use reqwest::Url;
use std::sync::OnceLock;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(https?://)?(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})(?::(\d+))?(/.*)?$")
            .expect("camera URL pattern is valid")
    })
}

/// A validated camera URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrl {
    normalized: String,
    url: Url,
}

impl StreamUrl {
    /// Normalize user input into a camera URL.
    ///
    /// `http://` is prepended unless an `http://` or `https://` scheme is
    /// present. The host must be a dotted-quad IPv4 address with an optional
    /// port and path.
    pub fn parse(input: &str) -> PipelineResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidUrl(
                "Please enter the IP camera URL".to_string(),
            ));
        }

        let normalized = match scheme_len(trimmed) {
            Some(len) => format!("{}{}", trimmed[..len].to_ascii_lowercase(), &trimmed[len..]),
            None => format!("http://{}", trimmed),
        };

        let invalid = || {
            PipelineError::InvalidUrl(format!(
                "'{}' is not a valid IP camera URL (e.g., http://192.168.1.100:8080)",
                trimmed
            ))
        };

        let captures = url_pattern().captures(&normalized).ok_or_else(invalid)?;

        for octet in 2..=5 {
            let value: u16 = captures[octet].parse().map_err(|_| invalid())?;
            if value > 255 {
                return Err(invalid());
            }
        }
        if let Some(port) = captures.get(6) {
            port.as_str().parse::<u16>().map_err(|_| invalid())?;
        }

        let url = Url::parse(&normalized).map_err(|_| invalid())?;
        Ok(Self { normalized, url })
    }

    /// The normalized text form, e.g. `http://192.168.1.10:8080`
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Length of a leading `http://` or `https://`, ignoring case
fn scheme_len(input: &str) -> Option<usize> {
    ["http://", "https://"].into_iter().find_map(|scheme| {
        input
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| scheme.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_added() {
        let url = StreamUrl::parse("192.168.1.10:8080").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.10:8080");
        assert_eq!(url.url().port(), Some(8080));
    }

    #[test]
    fn test_valid_urls() {
        let cases = [
            ("192.168.1.10", "http://192.168.1.10"),
            ("  10.0.0.5:81  ", "http://10.0.0.5:81"),
            ("http://10.0.0.5/video", "http://10.0.0.5/video"),
            ("HTTP://10.0.0.5:8080/mjpg/video.mjpg", "http://10.0.0.5:8080/mjpg/video.mjpg"),
            ("https://172.16.0.1:8443/stream?fps=25", "https://172.16.0.1:8443/stream?fps=25"),
        ];
        for (input, expected) in cases {
            let url = StreamUrl::parse(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(url.as_str(), expected);
            assert!(url.as_str().starts_with("http://") || url.as_str().starts_with("https://"));
        }
    }

    #[test]
    fn test_malformed_urls_are_rejected() {
        let cases = [
            "",
            "   ",
            "camera.local",
            "192.168.1",
            "192.168.1.",
            "192.168.one.10",
            "192.168.1.10a",
            "192.168.1.1000",
            "300.1.1.1",
            "192.168.1.10:port",
            "192.168.1.10:99999",
            "ftp://192.168.1.10",
            "rtsp://192.168.1.10:554",
            "http//192.168.1.10",
        ];
        for input in cases {
            assert!(
                matches!(StreamUrl::parse(input), Err(PipelineError::InvalidUrl(_))),
                "{input:?} should be rejected"
            );
        }
    }
}
