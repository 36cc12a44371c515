use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{LoginError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/simplesaml";
pub const DEFAULT_STATE_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_AUTHSOURCES_FILE: &str = "config/authsources.yaml";

#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Absolute URL the login module is served under, without trailing slash.
    pub base_url: String,
    /// Hosts (or host patterns, see `trusted_url_regex`) that return URLs may point at.
    pub trusted_url_domains: Vec<String>,
    pub trusted_url_regex: bool,
    pub state_ttl: Duration,
    pub authsources_file: PathBuf,
    pub listen_addr: SocketAddr,
    pub session_secure: bool,
}

impl LoginConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let trusted_url_domains = env::var("TRUSTED_URL_DOMAINS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let trusted_url_regex = env_flag("TRUSTED_URL_REGEX", false);

        let state_ttl_secs: u64 = match env::var("STATE_TTL_SECS") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %v, "invalid STATE_TTL_SECS, using default");
                DEFAULT_STATE_TTL_SECS
            }),
            Err(_) => DEFAULT_STATE_TTL_SECS,
        };

        let authsources_file = env::var("AUTHSOURCES_FILE")
            .unwrap_or_else(|_| DEFAULT_AUTHSOURCES_FILE.to_string())
            .into();

        let listen_addr = match env::var("LISTEN_ADDR") {
            Ok(addr) => addr.parse().map_err(|e| {
                LoginError::Configuration(format!("invalid LISTEN_ADDR '{addr}': {e}"))
            })?,
            Err(_) => default_listen_addr(),
        };

        let session_secure = env_flag("SESSION_SECURE", base_url.starts_with("https://"));

        let config = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            trusted_url_domains,
            trusted_url_regex,
            state_ttl: Duration::from_secs(state_ttl_secs),
            authsources_file,
            listen_addr,
            session_secure,
        };
        config.validate()?;

        if config.trusted_url_domains.is_empty() {
            tracing::info!("no trusted URL domains configured, only {} is trusted", config.base_url);
        }

        Ok(config)
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            trusted_url_domains: Vec::new(),
            trusted_url_regex: false,
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECS),
            authsources_file: DEFAULT_AUTHSOURCES_FILE.into(),
            listen_addr: default_listen_addr(),
            session_secure: base_url.starts_with("https://"),
        }
    }

    pub fn with_trusted_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_url_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trusted_regex(mut self, enabled: bool) -> Self {
        self.trusted_url_regex = enabled;
        self
    }

    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            LoginError::Configuration(format!("invalid BASE_URL '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(LoginError::Configuration(format!(
                "BASE_URL must be an absolute http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Path component of the base URL, always ending in `/`. Used as the
    /// cookie path.
    pub fn base_path(&self) -> String {
        let path = Url::parse(&self.base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        format!("{path}/")
    }

    /// Scheme, host and port of the base URL.
    pub fn origin(&self) -> String {
        Url::parse(&self.base_url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.base_url.clone())
    }

    /// Where logout and choice clearing send the user when no `ReturnTo` is given.
    pub fn default_return_url(&self) -> String {
        format!("{}/logout.php", self.base_url)
    }

    pub fn module_url(&self, page: &str) -> String {
        format!("{}/{}", self.base_url, page.trim_start_matches('/'))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path_and_origin() {
        let config = LoginConfig::new("https://example.org/simplesaml/");
        assert_eq!(config.base_url, "https://example.org/simplesaml");
        assert_eq!(config.base_path(), "/simplesaml/");
        assert_eq!(config.origin(), "https://example.org");
        assert_eq!(
            config.default_return_url(),
            "https://example.org/simplesaml/logout.php"
        );
        assert_eq!(
            config.module_url("/loginuserpass"),
            "https://example.org/simplesaml/loginuserpass"
        );
        assert!(config.session_secure);
    }

    #[test]
    fn test_root_base_path() {
        let config = LoginConfig::new("http://localhost:8000");
        assert_eq!(config.base_path(), "/");
        assert_eq!(config.origin(), "http://localhost:8000");
        assert!(!config.session_secure);
    }

    #[test]
    fn test_validate() {
        assert!(LoginConfig::new("https://example.org").validate().is_ok());
        assert!(LoginConfig::new("example.org/simplesaml").validate().is_err());
        assert!(LoginConfig::new("ftp://example.org").validate().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" example.com, ,idp.example.org "),
            vec!["example.com".to_string(), "idp.example.org".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}
