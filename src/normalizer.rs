use crate::error::{ScanError, Stage};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // RFC 3986 scheme followed by an authority marker
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap())
}

pub fn is_allowed_scheme(scheme: &str) -> bool {
    ALLOWED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str())
}

/// Turn a raw decoded or user-supplied string into an absolute http(s) URL.
///
/// Input without a scheme gets `http://` prepended. Anything else that fails
/// to parse, has no host, or uses a non-web scheme is rejected.
pub fn normalize(raw: &str) -> Result<Url, ScanError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::InvalidUrl("empty input".to_string()));
    }

    let candidate = if scheme_pattern().is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| ScanError::InvalidUrl(format!("{trimmed}: {e}")))?;

    if !is_allowed_scheme(url.scheme()) {
        return Err(ScanError::DisallowedScheme {
            scheme: url.scheme().to_string(),
            stage: Stage::Normalized,
        });
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ScanError::InvalidUrl(format!("{trimmed}: missing host"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_http() {
        assert_eq!(normalize("example.com").unwrap().as_str(), "http://example.com/");
        assert_eq!(
            normalize("  www.example.com/path?q=1 ").unwrap().as_str(),
            "http://www.example.com/path?q=1"
        );
    }

    #[test]
    fn test_existing_scheme_kept() {
        assert_eq!(
            normalize("HTTPS://Example.com/a").unwrap().as_str(),
            "https://example.com/a"
        );
        assert_eq!(normalize("http://8.8.8.8").unwrap().as_str(), "http://8.8.8.8/");
    }

    #[test]
    fn test_disallowed_scheme() {
        let err = normalize("ftp://files.example.com/x").unwrap_err();
        assert!(matches!(
            err,
            ScanError::DisallowedScheme { ref scheme, stage: Stage::Normalized } if scheme == "ftp"
        ));
        assert!(matches!(
            normalize("file:///etc/passwd"),
            Err(ScanError::DisallowedScheme { .. })
        ));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(normalize(""), Err(ScanError::InvalidUrl(_))));
        assert!(matches!(normalize("   "), Err(ScanError::InvalidUrl(_))));
        assert!(matches!(
            normalize("http://exa mple.com"),
            Err(ScanError::InvalidUrl(_))
        ));
        assert!(matches!(normalize("http://"), Err(ScanError::InvalidUrl(_))));
    }
}
