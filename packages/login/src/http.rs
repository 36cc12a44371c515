//! HTTP boundary: axum routes around the [`Login`] controller.
//!
//! Handlers translate the incoming request into a [`LoginRequest`], call the
//! controller and hand whatever it returns to an [`ActionRunner`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::config::LoginConfig;
use crate::controller::Login;
use crate::error::LoginError;
use crate::request::{parse_urlencoded, LoginRequest};
use crate::response::{build_clear_cookie, ActionTarget, Completion, DeferredAction, Response};
use crate::source::Attributes;
use crate::state::{AuthState, ATTRIBUTES_KEY, AUTHID};

type HttpResult = Result<axum::response::Response, LoginError>;

const SESSION_KEY_PREFIX: &str = "authsource:";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Login>,
}

/// What the session remembers about a completed login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogin {
    pub state_id: String,
    pub attributes: Attributes,
}

pub fn session_key(auth_source: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{auth_source}")
}

pub fn router(controller: Arc<Login>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/login/{auth_source}", get(start_login))
        .route("/logout/{auth_source}", get(logout))
        .route("/loginuserpass", get(loginuserpass).post(loginuserpass))
        .route("/loginuserpassorg", get(loginuserpassorg).post(loginuserpassorg))
        .route("/cleardiscochoices", get(cleardiscochoices))
        .with_state(AppState { controller })
}

async fn health() -> &'static str {
    "OK"
}

async fn welcome(State(state): State<AppState>, session: Session) -> HttpResult {
    ActionRunner::new(&state.controller, &session)
        .run(state.controller.welcome())
        .await
}

async fn start_login(
    State(state): State<AppState>,
    session: Session,
    Path(auth_source): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> HttpResult {
    let request = login_request(state.controller.config(), Method::GET, &uri, &headers, &[]);
    let response = state.controller.start_login(&request, &auth_source)?;
    ActionRunner::new(&state.controller, &session).run(response).await
}

async fn logout(
    State(state): State<AppState>,
    session: Session,
    Path(auth_source): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> HttpResult {
    let request = login_request(state.controller.config(), Method::GET, &uri, &headers, &[]);
    let response = state.controller.logout(&request, &auth_source)?;
    ActionRunner::new(&state.controller, &session).run(response).await
}

async fn loginuserpass(
    State(state): State<AppState>,
    session: Session,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult {
    let request = login_request(state.controller.config(), method, &uri, &headers, &body);
    let response = state.controller.loginuserpass(&request)?;
    ActionRunner::new(&state.controller, &session).run(response).await
}

async fn loginuserpassorg(
    State(state): State<AppState>,
    session: Session,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult {
    let request = login_request(state.controller.config(), method, &uri, &headers, &body);
    let response = state.controller.loginuserpassorg(&request)?;
    ActionRunner::new(&state.controller, &session).run(response).await
}

async fn cleardiscochoices(
    State(state): State<AppState>,
    session: Session,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> HttpResult {
    let request = login_request(state.controller.config(), Method::GET, &uri, &headers, &[]);
    let response = state.controller.cleardiscochoices(&request)?;
    ActionRunner::new(&state.controller, &session).run(response).await
}

/// Build the controller's view of an HTTP request.
pub fn login_request(
    config: &LoginConfig,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> LoginRequest {
    let mut request = LoginRequest::new(method);

    if let Some(query) = uri.query() {
        request.query = parse_urlencoded(query.as_bytes());
    }

    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if request.method == Method::POST && is_form {
        request.form = parse_urlencoded(body);
    }

    request.cookies = CookieJar::from_headers(headers)
        .iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    request.current_url = Some(format!("{}{}", config.origin(), path_and_query));
    request
}

/// Turns controller results into HTTP responses, running deferred actions
/// against the session on the way.
pub struct ActionRunner<'a> {
    controller: &'a Login,
    session: &'a Session,
}

impl<'a> ActionRunner<'a> {
    pub fn new(controller: &'a Login, session: &'a Session) -> Self {
        Self {
            controller,
            session,
        }
    }

    pub async fn run(&self, response: Response) -> HttpResult {
        match response {
            Response::Template(template) => Ok(Json(template).into_response()),
            Response::Redirect(url) => Ok(Redirect::to(&url).into_response()),
            Response::Deferred(action) => self.run_deferred(action).await,
            Response::Authenticated(completion) => self.complete(completion).await,
        }
    }

    async fn run_deferred(&self, action: DeferredAction) -> HttpResult {
        let return_to = action.arguments().first().cloned().unwrap_or_default();

        match (action.target, action.method.as_str()) {
            (ActionTarget::SimpleAuth { auth_source }, "logout") => {
                self.logout(&auth_source).await?;
                Ok(Redirect::to(&return_to).into_response())
            }
            (ActionTarget::DiscoChoices { cookies, cookie_path }, "clearChoices") => {
                let cookies = cookies
                    .into_iter()
                    .map(|name| build_clear_cookie(name, cookie_path.clone(), false));
                Ok(with_cookies(cookies, &return_to))
            }
            (target, method) => Err(LoginError::Internal(format!(
                "no deferred action '{method}' on {target:?}"
            ))),
        }
    }

    async fn logout(&self, auth_source: &str) -> Result<(), LoginError> {
        let key = session_key(auth_source);
        let login: Option<SessionLogin> = self.session.remove(&key).await.map_err(session_error)?;

        let Some(login) = login else {
            tracing::debug!(auth_source, "logout without an active login");
            return Ok(());
        };

        let mut state = AuthState::new();
        state.insert(AUTHID.to_string(), Value::from(auth_source));
        state.insert(ATTRIBUTES_KEY.to_string(), serde_json::to_value(&login.attributes)?);
        if let Some(source) = self.controller.sources().get(auth_source) {
            source.logout(&state);
        }
        self.controller.state_store().delete_state(&login.state_id)?;

        tracing::info!(auth_source, "logged out");
        Ok(())
    }

    async fn complete(&self, completion: Completion) -> HttpResult {
        let login = SessionLogin {
            state_id: completion.state_id,
            attributes: completion.attributes,
        };
        self.session
            .insert(&session_key(&completion.auth_source), login)
            .await
            .map_err(session_error)?;

        Ok(with_cookies(completion.cookies, &completion.return_url))
    }
}

fn with_cookies<I>(cookies: I, location: &str) -> axum::response::Response
where
    I: IntoIterator<Item = Cookie<'static>>,
{
    let jar = cookies
        .into_iter()
        .fold(CookieJar::new(), |jar, cookie| jar.add(cookie));
    (jar, Redirect::to(location)).into_response()
}

fn session_error(e: tower_sessions::session::Error) -> LoginError {
    LoginError::Internal(format!("session error: {e}"))
}

impl LoginError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::InvalidUrl(_)
            | Self::MalformedUrl(_)
            | Self::NoState { .. }
            | Self::WrongStage { .. } => StatusCode::BAD_REQUEST,
            Self::WrongUserPass | Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Configuration(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> axum::response::Response {
        if let Self::NoState {
            restart_url: Some(url),
        } = &self
        {
            tracing::info!(restart_url = %url, "state lost, restarting login");
            return Redirect::to(url).into_response();
        }

        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "login request failed");
            "Internal server error".to_string()
        } else {
            tracing::warn!(kind = self.kind(), error = %self, "login request rejected");
            self.to_string()
        };

        (status, Json(json!({ "error": self.kind(), "message": message }))).into_response()
    }
}
