//! Return URL allow-list.
//!
//! Return URLs supplied by the browser are only followed when their host is
//! the IdP's own host or one of the configured trusted hosts.

use regex::Regex;
use url::{ParseError, Url};

use crate::config::LoginConfig;
use crate::error::{LoginError, Result};

#[derive(Debug, Clone)]
enum Trusted {
    Hosts(Vec<String>),
    Patterns(Vec<Regex>),
}

#[derive(Debug, Clone)]
pub struct UrlAllowList {
    self_host: String,
    trusted: Trusted,
}

impl UrlAllowList {
    /// Build an allow-list trusting the host of `base_url` and `trusted`.
    ///
    /// With `regex` set every entry is a pattern that must match the whole
    /// host (`host:port` when a port is given).
    pub fn new(base_url: &str, trusted: &[String], regex: bool) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            LoginError::Configuration(format!("invalid base URL '{base_url}': {e}"))
        })?;
        let self_host = host_of(&base).ok_or_else(|| {
            LoginError::Configuration(format!("base URL '{base_url}' has no host"))
        })?;

        let trusted = if regex {
            let patterns = trusted
                .iter()
                .map(|p| {
                    Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                        LoginError::Configuration(format!("invalid trusted URL pattern '{p}': {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Trusted::Patterns(patterns)
        } else {
            Trusted::Hosts(trusted.iter().map(|h| h.to_ascii_lowercase()).collect())
        };

        Ok(Self { self_host, trusted })
    }

    pub fn from_config(config: &LoginConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            &config.trusted_url_domains,
            config.trusted_url_regex,
        )
    }

    /// Validate `url`, resolving it against `current_url` when relative.
    ///
    /// Returns the serialization of the URL that was checked, which is what
    /// callers must redirect to. An empty input yields an empty string.
    pub fn check(&self, url: &str, current_url: Option<&str>) -> Result<String> {
        if url.is_empty() {
            return Ok(String::new());
        }
        // The parser silently drops tabs and newlines; refuse them instead.
        if url.chars().any(char::is_control) {
            return Err(LoginError::MalformedUrl(url.escape_default().to_string()));
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(ParseError::RelativeUrlWithoutBase) => current_url
                .and_then(|c| Url::parse(c).ok())
                .and_then(|base| base.join(url).ok())
                .ok_or_else(|| LoginError::MalformedUrl(url.to_string()))?,
            Err(_) => return Err(LoginError::MalformedUrl(url.to_string())),
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LoginError::MalformedUrl(url.to_string()));
        }
        let host = host_of(&parsed).ok_or_else(|| LoginError::MalformedUrl(url.to_string()))?;

        if self.is_trusted(&host) {
            Ok(parsed.into())
        } else {
            tracing::warn!(url = %parsed, "rejected untrusted return URL");
            Err(LoginError::InvalidUrl(url.to_string()))
        }
    }

    fn is_trusted(&self, host: &str) -> bool {
        if host == self.self_host {
            return true;
        }
        match &self.trusted {
            Trusted::Hosts(hosts) => hosts.iter().any(|h| h == host),
            Trusted::Patterns(patterns) => patterns.iter().any(|p| p.is_match(host)),
        }
    }
}

/// Host of `url`, with `:port` appended when the port is not the scheme default.
fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.org/simplesaml";

    fn allow_list(trusted: &[&str], regex: bool) -> UrlAllowList {
        let trusted: Vec<String> = trusted.iter().map(|s| s.to_string()).collect();
        UrlAllowList::new(BASE, &trusted, regex).unwrap()
    }

    #[test]
    fn test_own_host_is_trusted() {
        let list = allow_list(&[], false);
        assert_eq!(
            list.check("https://example.org/something", None).unwrap(),
            "https://example.org/something"
        );
    }

    #[test]
    fn test_untrusted_host_rejected() {
        let list = allow_list(&[], false);
        let err = list.check("https://loeki.tv/asjemenou", None).unwrap_err();
        assert_eq!(err.to_string(), "URL not allowed: https://loeki.tv/asjemenou");
    }

    #[test]
    fn test_trusted_hosts() {
        let list = allow_list(&["SP.Example.com", "app.example.net:8443"], false);
        assert!(list.check("https://sp.example.com/acs", None).is_ok());
        assert!(list.check("https://app.example.net:8443/", None).is_ok());
        assert!(list.check("https://app.example.net/", None).is_err());
        assert!(list.check("https://evil.sp.example.com/", None).is_err());
    }

    #[test]
    fn test_regex_is_anchored() {
        let list = allow_list(&[r".*\.example\.com"], true);
        assert!(list.check("https://sp.example.com/", None).is_ok());
        assert!(list.check("https://sp.example.com.evil.tv/", None).is_err());
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let trusted = vec!["(".to_string()];
        assert!(matches!(
            UrlAllowList::new(BASE, &trusted, true),
            Err(LoginError::Configuration(_))
        ));
    }

    #[test]
    fn test_relative_url_resolved_against_current() {
        let list = allow_list(&[], false);
        let current = "https://example.org/simplesaml/logout/example-authsource";
        assert_eq!(
            list.check("/simplesaml/done", Some(current)).unwrap(),
            "https://example.org/simplesaml/done"
        );
        assert!(matches!(
            list.check("/simplesaml/done", None),
            Err(LoginError::MalformedUrl(_))
        ));
    }

    #[test]
    fn test_non_http_rejected() {
        let list = allow_list(&[], false);
        assert!(matches!(
            list.check("javascript:alert(1)", None),
            Err(LoginError::MalformedUrl(_))
        ));
    }

    #[test]
    fn test_control_characters_rejected() {
        let list = allow_list(&[], false);
        for url in ["https://example.org/a\nb", "https://example.org/a\r\nLocation: x", "https://exa\tmple.org/"] {
            assert!(
                matches!(list.check(url, None), Err(LoginError::MalformedUrl(_))),
                "{url:?} accepted"
            );
        }
    }

    #[test]
    fn test_returns_checked_serialization() {
        let list = allow_list(&[], false);
        assert_eq!(
            list.check("HTTPS://Example.org", None).unwrap(),
            "https://example.org/"
        );
    }

    #[test]
    fn test_empty_url() {
        let list = allow_list(&[], false);
        assert_eq!(list.check("", None).unwrap(), "");
    }
}
