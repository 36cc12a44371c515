//! Error types for the login flow.
//!
//! Every variant's display text is surfaced to the caller verbatim, so the
//! messages are part of the external contract.

use thiserror::Error;

/// Main error type for login flow operations.
#[derive(Debug, Error)]
pub enum LoginError {
    /// A required request parameter is missing or malformed.
    #[error("{0}")]
    BadRequest(String),

    /// A caller-supplied return URL is not on the allow-list.
    #[error("URL not allowed: {0}")]
    InvalidUrl(String),

    /// A caller-supplied URL could not be understood at all.
    #[error("Invalid URL: {0}")]
    MalformedUrl(String),

    /// The resolved authentication source cannot serve this flow, or the
    /// deployment itself is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The state store has no (live) state for the given identifier.
    #[error("State information lost")]
    NoState { restart_url: Option<String> },

    /// The state exists but was saved by a different stage of the flow.
    #[error("Wrong stage in state. Was '{actual}', should be '{expected}'.")]
    WrongStage { expected: String, actual: String },

    /// The submitted username/password combination was rejected.
    #[error("WRONGUSERPASS")]
    WrongUserPass,

    /// Any other login failure the user should see on the form.
    #[error("{code}")]
    Authentication { code: String, params: Vec<String> },

    /// IO error (reading configuration files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON conversion of state values
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LoginError {
    /// Stable tag used in response bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::InvalidUrl(_) => "invalid_url",
            Self::MalformedUrl(_) => "malformed_url",
            Self::Configuration(_) => "configuration",
            Self::NoState { .. } => "no_state",
            Self::WrongStage { .. } => "wrong_stage",
            Self::WrongUserPass => "wrong_user_pass",
            Self::Authentication { .. } => "authentication",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Json(_) => "json",
            Self::Internal(_) => "internal",
        }
    }

    /// Errors that belong on the login form rather than on an error page.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::WrongUserPass | Self::Authentication { .. })
    }

    /// Error code and parameters as shown on the login form.
    pub fn form_error(&self) -> Option<(String, Vec<String>)> {
        match self {
            Self::WrongUserPass => Some(("WRONGUSERPASS".to_string(), Vec::new())),
            Self::Authentication { code, params } => Some((code.clone(), params.clone())),
            _ => None,
        }
    }

    pub fn authentication(code: impl Into<String>) -> Self {
        Self::Authentication {
            code: code.into(),
            params: Vec::new(),
        }
    }
}

/// Result type alias for login flow operations
pub type Result<T> = std::result::Result<T, LoginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_display() {
        let err = LoginError::InvalidUrl("https://loeki.tv/asjemenou".to_string());
        assert_eq!(err.to_string(), "URL not allowed: https://loeki.tv/asjemenou");
    }

    #[test]
    fn test_wrong_stage_display() {
        let err = LoginError::WrongStage {
            expected: "core:UserPassBase.state".to_string(),
            actual: "core:UserPassOrgBase.state".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Wrong stage in state. Was 'core:UserPassOrgBase.state', should be 'core:UserPassBase.state'."
        );
    }

    #[test]
    fn test_form_errors() {
        assert!(LoginError::WrongUserPass.is_user_facing());
        assert_eq!(
            LoginError::WrongUserPass.form_error(),
            Some(("WRONGUSERPASS".to_string(), Vec::new()))
        );

        let err = LoginError::authentication("NOACCESS");
        assert_eq!(err.to_string(), "NOACCESS");
        assert_eq!(err.kind(), "authentication");

        let err = LoginError::BadRequest("Missing AuthState parameter.".to_string());
        assert!(!err.is_user_facing());
        assert_eq!(err.form_error(), None);
    }
}
