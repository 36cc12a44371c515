use std::collections::HashMap;

use axum::http::Method;

/// A request as seen by the login controller, independent of the HTTP stack.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub method: Method,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Full URL of the request, used to resolve relative return URLs.
    pub current_url: Option<String>,
}

impl LoginRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: HashMap::new(),
            form: HashMap::new(),
            cookies: HashMap::new(),
            current_url: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Look a parameter up in the form body first, then in the query string.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }
}

impl Default for LoginRequest {
    fn default() -> Self {
        Self::get()
    }
}

/// Decode an `application/x-www-form-urlencoded` string (query or body).
pub fn parse_urlencoded(input: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_prefers_form() {
        let request = LoginRequest::post()
            .with_query("AuthState", "fromQuery")
            .with_form("AuthState", "fromForm")
            .with_query("ReturnTo", "https://example.org/");

        assert_eq!(request.param("AuthState"), Some("fromForm"));
        assert_eq!(request.query_param("AuthState"), Some("fromQuery"));
        assert_eq!(request.param("ReturnTo"), Some("https://example.org/"));
        assert_eq!(request.param("missing"), None);
    }

    #[test]
    fn test_parse_urlencoded() {
        let params = parse_urlencoded(b"AuthState=_abc%3Ahttps%3A%2F%2Fexample.org&username=a+b");
        assert_eq!(params.get("AuthState").map(String::as_str), Some("_abc:https://example.org"));
        assert_eq!(params.get("username").map(String::as_str), Some("a b"));
    }
}
