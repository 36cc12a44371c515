//! Controller for the pages of the `core` login module.
//!
//! Every operation maps a [`LoginRequest`] to a [`Response`] value. Side
//! effects other than saving authentication state are left to whoever runs
//! the returned value.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum_extra::extract::cookie::Cookie;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::LoginConfig;
use crate::error::{LoginError, Result};
use crate::request::LoginRequest;
use crate::response::{
    build_clear_cookie, build_cookie, ActionTarget, Completion, DeferredAction, Response, Template,
};
use crate::source::{
    Attributes, AuthSource, AuthSourceRegistry, Source, SourceMap, UserPassOrgSource,
    UserPassSource, UsernameOrgMethod,
};
use crate::state::{
    AuthState, AuthStateStore, MemoryStateStore, ATTRIBUTES_KEY, AUTHID, BASIC_STAGE,
    FORCED_USERNAME_KEY, REMEMBER_ME_KEY, RESTART_URL_KEY, RETURN_URL_KEY, SELECTED_ORG_KEY,
    USERPASS_ORG_STAGE, USERPASS_STAGE,
};
use crate::url_check::UrlAllowList;

pub const WELCOME_TEMPLATE: &str = "core:welcome.twig";
pub const LOGIN_TEMPLATE: &str = "core:loginuserpass.twig";
pub const DISCO_COOKIE_PREFIX: &str = "idpdisco_";

const REMEMBER_COOKIE_MAX_AGE: time::Duration = time::Duration::days(90);

/// What the login form is being rendered for.
struct FormContext<'a> {
    request: &'a LoginRequest,
    state_id: &'a str,
    state: &'a AuthState,
}

pub struct Login {
    config: Arc<LoginConfig>,
    allow_list: UrlAllowList,
    state_store: Arc<dyn AuthStateStore>,
    sources: Arc<dyn AuthSourceRegistry>,
}

impl Login {
    /// Create a controller with an in-memory state store and no sources.
    pub fn new(config: LoginConfig) -> Result<Self> {
        let allow_list = UrlAllowList::from_config(&config)?;
        let state_store = Arc::new(MemoryStateStore::new(config.state_ttl));
        Ok(Self {
            config: Arc::new(config),
            allow_list,
            state_store,
            sources: Arc::new(SourceMap::new()),
        })
    }

    pub fn with_state_store(mut self, store: Arc<dyn AuthStateStore>) -> Self {
        self.state_store = store;
        self
    }

    pub fn with_sources(mut self, sources: Arc<dyn AuthSourceRegistry>) -> Self {
        self.sources = sources;
        self
    }

    pub fn set_auth_state(&mut self, store: Arc<dyn AuthStateStore>) {
        self.state_store = store;
    }

    pub fn set_auth_source(&mut self, sources: Arc<dyn AuthSourceRegistry>) {
        self.sources = sources;
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    pub fn sources(&self) -> &dyn AuthSourceRegistry {
        self.sources.as_ref()
    }

    pub fn state_store(&self) -> &dyn AuthStateStore {
        self.state_store.as_ref()
    }

    pub fn welcome(&self) -> Response {
        Template::new(WELCOME_TEMPLATE).into()
    }

    pub fn logout(&self, request: &LoginRequest, auth_source: &str) -> Result<Response> {
        if auth_source.is_empty() {
            return Err(LoginError::BadRequest(
                "Missing authentication source.".to_string(),
            ));
        }

        let return_to = self.return_path(request)?;
        debug!(auth_source, return_to = %return_to, "logout requested");

        Ok(DeferredAction::new(
            ActionTarget::SimpleAuth {
                auth_source: auth_source.to_string(),
            },
            "logout",
            vec![return_to],
        )
        .into())
    }

    pub fn cleardiscochoices(&self, request: &LoginRequest) -> Result<Response> {
        let return_to = self.return_path(request)?;

        let mut cookies: Vec<String> = request
            .cookies
            .keys()
            .filter(|name| name.starts_with(DISCO_COOKIE_PREFIX))
            .cloned()
            .collect();
        cookies.sort_unstable();
        debug!(cookies = cookies.len(), return_to = %return_to, "clearing discovery choices");

        Ok(DeferredAction::new(
            ActionTarget::DiscoChoices {
                cookies,
                cookie_path: self.config.base_path(),
            },
            "clearChoices",
            vec![return_to],
        )
        .into())
    }

    /// Begin a login with `auth_source`: park a fresh state and send the
    /// browser to the matching login form. Sources without a form complete
    /// immediately.
    pub fn start_login(&self, request: &LoginRequest, auth_source: &str) -> Result<Response> {
        let source = self.resolve(auth_source)?;

        let return_to = match request.param("ReturnTo").filter(|u| !u.is_empty()) {
            Some(url) => self.allow_list.check(url, request.current_url())?,
            None => format!("{}/", self.config.base_url),
        };

        let mut state = AuthState::new();
        state.insert(AUTHID.to_string(), Value::from(auth_source));
        state.insert(RETURN_URL_KEY.to_string(), Value::from(return_to));
        if let Some(current) = request.current_url() {
            state.insert(RESTART_URL_KEY.to_string(), Value::from(current));
        }

        let (stage, page) = match &source {
            Source::Basic(source) => {
                source.authenticate(&mut state)?;
                return self.complete(auth_source, state, BASIC_STAGE, Vec::new());
            }
            Source::UserPass(_) => (USERPASS_STAGE, "loginuserpass"),
            Source::UserPassOrg(_) => (USERPASS_ORG_STAGE, "loginuserpassorg"),
        };

        let state_id = self.state_store.save_state(&mut state, stage)?;
        info!(auth_source, "login started");

        Ok(Response::Redirect(format!(
            "{}?AuthState={}",
            self.config.module_url(page),
            urlencoding::encode(&state_id)
        )))
    }

    pub fn loginuserpass(&self, request: &LoginRequest) -> Result<Response> {
        let (state_id, state) = self.load_flow(request, USERPASS_STAGE)?;
        let auth_id = owner(&state)?;
        let source = match self.resolve(&auth_id)? {
            Source::UserPass(source) => source,
            other => return Err(wrong_capability(&other, "username/password")),
        };
        let form = FormContext {
            request,
            state_id: &state_id,
            state: &state,
        };

        if !credentials_submitted(request) {
            let username = self.remembered_username(source.as_ref(), request);
            return Ok(self.login_page(source.as_ref(), &form, &username, None).into());
        }

        let username = submitted_username(request, &state);
        let password = request.param("password").unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            let err = LoginError::WrongUserPass;
            return Ok(self.login_page(source.as_ref(), &form, &username, Some(&err)).into());
        }

        let attributes = match source.login(&username, password) {
            Ok(attributes) => attributes,
            Err(e) if e.is_user_facing() => {
                warn!(auth_source = %auth_id, error = %e, "login rejected");
                return Ok(self.login_page(source.as_ref(), &form, &username, Some(&e)).into());
            }
            Err(e) => return Err(e),
        };

        let cookies = self.remember_username_cookie(source.as_ref(), request, &username);
        self.finish_login(
            source.as_ref(),
            request,
            state,
            USERPASS_STAGE,
            attributes,
            cookies.into_iter().collect(),
        )
    }

    pub fn loginuserpassorg(&self, request: &LoginRequest) -> Result<Response> {
        let (state_id, mut state) = self.load_flow(request, USERPASS_ORG_STAGE)?;
        let auth_id = owner(&state)?;
        let source = match self.resolve(&auth_id)? {
            Source::UserPassOrg(source) => source,
            other => return Err(wrong_capability(&other, "username/password/organization")),
        };

        let method = source.username_org_method();
        let organizations = match method {
            UsernameOrgMethod::Force => None,
            _ => source.organizations(),
        };
        let remembered_org = if source.remember_organization_enabled() {
            request.cookie(&format!("{auth_id}-organization"))
        } else {
            None
        };
        let org_page = |username: &str, selected: &str, error: Option<&LoginError>| {
            let form = FormContext {
                request,
                state_id: &state_id,
                state: &state,
            };
            let mut page = self.login_page(source.as_ref(), &form, username, error);
            organization_fields(
                &mut page,
                source.as_ref(),
                request,
                organizations.as_ref(),
                selected,
                remembered_org.is_some(),
            );
            page
        };

        if !credentials_submitted(request) {
            let username = self.remembered_username(source.as_ref(), request);
            let selected = request
                .param("organization")
                .or(remembered_org)
                .unwrap_or_default();
            return Ok(org_page(&username, selected, None).into());
        }

        let submitted = submitted_username(request, &state);
        let password = request.param("password").unwrap_or_default();
        let mut username = submitted.clone();
        let mut organization = request.param("organization").unwrap_or_default().to_string();

        if method != UsernameOrgMethod::None {
            match submitted.split_once('@') {
                Some((user, org)) => {
                    username = user.to_string();
                    organization = org.to_string();
                }
                None if method == UsernameOrgMethod::Force => {
                    let err = LoginError::WrongUserPass;
                    return Ok(org_page(&submitted, &organization, Some(&err)).into());
                }
                None => {}
            }
        }

        if username.is_empty()
            || password.is_empty()
            || (organizations.is_some() && organization.is_empty())
        {
            let err = LoginError::WrongUserPass;
            return Ok(org_page(&submitted, &organization, Some(&err)).into());
        }

        let attributes = match source.login(&username, password, &organization) {
            Ok(attributes) => attributes,
            Err(e) if e.is_user_facing() => {
                warn!(auth_source = %auth_id, organization = %organization, error = %e, "login rejected");
                return Ok(org_page(&submitted, &organization, Some(&e)).into());
            }
            Err(e) => return Err(e),
        };

        let mut cookies: Vec<Cookie<'static>> = self
            .remember_username_cookie(source.as_ref(), request, &submitted)
            .into_iter()
            .collect();
        if source.remember_organization_enabled() {
            cookies.push(self.remember_cookie(
                format!("{auth_id}-organization"),
                request.param("remember_organization").is_some(),
                &organization,
            ));
        }

        state.insert(SELECTED_ORG_KEY.to_string(), Value::from(organization));
        self.finish_login(
            source.as_ref(),
            request,
            state,
            USERPASS_ORG_STAGE,
            attributes,
            cookies,
        )
    }

    /// The validated `ReturnTo` parameter, or the default return URL.
    fn return_path(&self, request: &LoginRequest) -> Result<String> {
        match request.param("ReturnTo").filter(|u| !u.is_empty()) {
            Some(url) => self.allow_list.check(url, request.current_url()),
            None => Ok(self.config.default_return_url()),
        }
    }

    fn load_flow(&self, request: &LoginRequest, stage: &str) -> Result<(String, AuthState)> {
        let state_id = request
            .param("AuthState")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LoginError::BadRequest("Missing AuthState parameter.".to_string()))?
            .to_string();

        match self.state_store.load_state(&state_id, stage, false) {
            Ok(Some(state)) => Ok((state_id, state)),
            Ok(None) => Err(LoginError::NoState { restart_url: None }),
            Err(LoginError::NoState { restart_url }) => {
                // The restart URL travels inside the browser-supplied id.
                let restart_url = restart_url.and_then(|url| self.allow_list.check(&url, None).ok());
                Err(LoginError::NoState { restart_url })
            }
            Err(e) => Err(e),
        }
    }

    fn resolve(&self, auth_id: &str) -> Result<Source> {
        self.sources.get(auth_id).ok_or_else(|| {
            LoginError::BadRequest(format!(
                "No authentication source with id '{auth_id}' found."
            ))
        })
    }

    fn login_page<S: AuthSource + ?Sized>(
        &self,
        source: &S,
        form: &FormContext<'_>,
        username: &str,
        error: Option<&LoginError>,
    ) -> Template {
        let request = form.request;
        let forced = form.state.get(FORCED_USERNAME_KEY).and_then(Value::as_str);

        let remember_username_checked = if credentials_submitted(request) {
            request.param("remember_username").is_some()
        } else {
            source.remember_username_checked()
                || request.cookie(&format!("{}-username", source.id())).is_some()
        };
        let remember_me_checked = if credentials_submitted(request) {
            request.param("remember_me").is_some()
        } else {
            source.remember_me_checked()
        };

        let mut page = Template::new(LOGIN_TEMPLATE);
        page.insert("stateparams", json!({ "AuthState": form.state_id }));
        page.insert("username", forced.unwrap_or(username));
        page.insert("forceUsername", forced.is_some());
        page.insert("rememberUsernameEnabled", source.remember_username_enabled());
        page.insert("rememberUsernameChecked", remember_username_checked);
        page.insert("rememberMeEnabled", source.remember_me_enabled());
        page.insert("rememberMeChecked", remember_me_checked);
        page.insert("links", json!(source.login_links()));
        page.insert("formURL", request.current_url().unwrap_or_default());

        match error.and_then(LoginError::form_error) {
            Some((code, params)) => {
                page.insert("errorcode", code);
                page.insert("errorparams", params);
            }
            None => {
                page.insert("errorcode", Value::Null);
                page.insert("errorparams", Value::Null);
            }
        }
        page
    }

    fn remembered_username<S: AuthSource + ?Sized>(&self, source: &S, request: &LoginRequest) -> String {
        if !source.remember_username_enabled() {
            return String::new();
        }
        request
            .cookie(&format!("{}-username", source.id()))
            .unwrap_or_default()
            .to_string()
    }

    fn remember_username_cookie<S: AuthSource + ?Sized>(
        &self,
        source: &S,
        request: &LoginRequest,
        username: &str,
    ) -> Option<Cookie<'static>> {
        if !source.remember_username_enabled() {
            return None;
        }
        Some(self.remember_cookie(
            format!("{}-username", source.id()),
            request.param("remember_username").is_some(),
            username,
        ))
    }

    fn remember_cookie(&self, name: String, remember: bool, value: &str) -> Cookie<'static> {
        let path = self.config.base_path();
        if remember {
            build_cookie(
                name,
                value,
                path,
                REMEMBER_COOKIE_MAX_AGE,
                self.config.session_secure,
            )
        } else {
            build_clear_cookie(name, path, true)
        }
    }

    /// Merge the login result into the state and let the source finish.
    fn finish_login<S: AuthSource + ?Sized>(
        &self,
        source: &S,
        request: &LoginRequest,
        mut state: AuthState,
        stage: &str,
        attributes: Attributes,
        cookies: Vec<Cookie<'static>>,
    ) -> Result<Response> {
        let mut merged: Attributes = state
            .get(ATTRIBUTES_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        merged.extend(attributes);
        state.insert(ATTRIBUTES_KEY.to_string(), serde_json::to_value(&merged)?);

        if source.remember_me_enabled() {
            state.insert(
                REMEMBER_ME_KEY.to_string(),
                Value::Bool(request.param("remember_me").is_some()),
            );
        }

        source.authenticate(&mut state)?;
        self.complete(source.id(), state, stage, cookies)
    }

    fn complete(
        &self,
        auth_source: &str,
        mut state: AuthState,
        stage: &str,
        cookies: Vec<Cookie<'static>>,
    ) -> Result<Response> {
        let return_url = state
            .get(RETURN_URL_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LoginError::BadRequest("No ReturnURL in authentication state.".to_string())
            })?;
        let attributes: Attributes = match state.get(ATTRIBUTES_KEY) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Attributes::new(),
        };

        let state_id = self.state_store.save_state(&mut state, stage)?;
        info!(auth_source, "authentication completed");

        Ok(Response::Authenticated(Completion {
            auth_source: auth_source.to_string(),
            state_id,
            attributes,
            return_url,
            cookies,
        }))
    }
}

fn organization_fields(
    page: &mut Template,
    source: &dyn UserPassOrgSource,
    request: &LoginRequest,
    organizations: Option<&BTreeMap<String, String>>,
    selected: &str,
    remembered: bool,
) {
    match organizations {
        Some(organizations) => {
            page.insert("organizations", json!(organizations));
            page.insert("selectedOrg", selected);
        }
        None => {
            page.insert("organizations", Value::Null);
            page.insert("selectedOrg", Value::Null);
        }
    }

    let checked = if credentials_submitted(request) {
        request.param("remember_organization").is_some()
    } else {
        source.remember_organization_checked() || remembered
    };
    page.insert(
        "rememberOrganizationEnabled",
        source.remember_organization_enabled() && organizations.is_some(),
    );
    page.insert("rememberOrganizationChecked", checked);
}

fn credentials_submitted(request: &LoginRequest) -> bool {
    request.param("username").is_some() || request.param("password").is_some()
}

/// Username to log in with: the forced one from state, otherwise the submitted one.
fn submitted_username(request: &LoginRequest, state: &AuthState) -> String {
    state
        .get(FORCED_USERNAME_KEY)
        .and_then(Value::as_str)
        .or_else(|| request.param("username"))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn owner(state: &AuthState) -> Result<String> {
    state
        .get(AUTHID)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            LoginError::BadRequest("Authentication state has no authentication source.".to_string())
        })
}

fn wrong_capability(source: &Source, required: &str) -> LoginError {
    LoginError::Configuration(format!(
        "authentication source '{}' provides {} login, {} is required",
        source.id(),
        source.capability(),
        required
    ))
}
