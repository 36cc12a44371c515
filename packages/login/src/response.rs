//! Values returned by the login controller.
//!
//! The controller never writes to the HTTP response itself. It returns one
//! of these values and the HTTP layer renders or runs it.

use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::source::Attributes;

/// A page to render: template name plus the values it is rendered with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    #[serde(rename = "template")]
    name: String,
    data: Map<String, Value>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Map::new(),
        }
    }

    pub fn template_name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }
}

/// Object a deferred action is invoked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    /// The session-level login wrapper for one authentication source.
    SimpleAuth { auth_source: String },
    /// The remembered IdP discovery choices, kept in browser cookies.
    DiscoChoices {
        cookies: Vec<String>,
        cookie_path: String,
    },
}

/// "Invoke `method` on `target` with `arguments`", run after the controller
/// has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAction {
    pub target: ActionTarget,
    pub method: String,
    pub arguments: Vec<String>,
}

impl DeferredAction {
    pub fn new(target: ActionTarget, method: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            target,
            method: method.into(),
            arguments,
        }
    }

    pub fn callable(&self) -> (&ActionTarget, &str) {
        (&self.target, &self.method)
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

/// Cookie set for `max_age`, scoped to `path`.
pub fn build_cookie(
    name: impl Into<String>,
    value: impl Into<String>,
    path: impl Into<String>,
    max_age: time::Duration,
    secure: bool,
) -> Cookie<'static> {
    let (name, value, path): (String, String, String) = (name.into(), value.into(), path.into());
    Cookie::build((name, value))
        .path(path)
        .max_age(max_age)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Cookie that makes the browser drop `name` at `path`.
pub fn build_clear_cookie(
    name: impl Into<String>,
    path: impl Into<String>,
    http_only: bool,
) -> Cookie<'static> {
    let (name, path): (String, String) = (name.into(), path.into());
    Cookie::build((name, ""))
        .path(path)
        .max_age(time::Duration::ZERO)
        .http_only(http_only)
        .same_site(SameSite::Lax)
        .build()
}

/// A finished login: who authenticated, with what, and where to go next.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub auth_source: String,
    pub state_id: String,
    pub attributes: Attributes,
    pub return_url: String,
    pub cookies: Vec<Cookie<'static>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Template(Template),
    Deferred(DeferredAction),
    Authenticated(Completion),
    Redirect(String),
}

impl Response {
    pub fn as_template(&self) -> Option<&Template> {
        match self {
            Self::Template(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&DeferredAction> {
        match self {
            Self::Deferred(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_completion(&self) -> Option<&Completion> {
        match self {
            Self::Authenticated(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Template> for Response {
    fn from(template: Template) -> Self {
        Self::Template(template)
    }
}

impl From<DeferredAction> for Response {
    fn from(action: DeferredAction) -> Self {
        Self::Deferred(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_serializes_name_and_data() {
        let mut template = Template::new("core:welcome.twig");
        template.insert("username", "student");

        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"template": "core:welcome.twig", "data": {"username": "student"}})
        );
    }

    #[test]
    fn test_build_cookie() {
        let cookie = build_cookie(
            "example-userpass-username",
            "student",
            "/simplesaml/",
            time::Duration::days(90),
            true,
        );
        assert_eq!(cookie.name(), "example-userpass-username");
        assert_eq!(cookie.value(), "student");
        assert_eq!(cookie.path(), Some("/simplesaml/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(90)));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn test_build_clear_cookie() {
        let cookie = build_clear_cookie("idpdisco_saml", "/", false);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.path(), Some("/"));
    }
}
