//! Shared fakes for the login integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use idp_login::error::{LoginError, Result};
use idp_login::source::{
    Attributes, AuthSource, AuthSourceRegistry, Source, UserPassOrgSource, UserPassSource,
    UsernameOrgMethod,
};
use idp_login::state::{AuthState, AuthStateStore, AUTHID, RETURN_URL_KEY};
use idp_login::{Login, LoginConfig};

pub const BASE_URL: &str = "https://example.org/simplesaml";

pub fn test_config() -> LoginConfig {
    LoginConfig::new(BASE_URL)
}

/// State store that hands out the same state for every id and stage.
pub struct FixedStateStore {
    state: AuthState,
    pub saved: Mutex<Vec<(AuthState, String)>>,
}

impl FixedStateStore {
    pub fn new(auth_id: &str) -> Self {
        let mut state = AuthState::new();
        state.insert(AUTHID.to_string(), Value::from(auth_id));
        Self {
            state,
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entry(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.state.insert(key.to_string(), value.into());
        self
    }

    pub fn with_return_url(self, url: &str) -> Self {
        self.with_entry(RETURN_URL_KEY, url)
    }

    pub fn saved(&self) -> Vec<(AuthState, String)> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl AuthStateStore for FixedStateStore {
    fn load_state(&self, _id: &str, _stage: &str, _allow_missing: bool) -> Result<Option<AuthState>> {
        Ok(Some(self.state.clone()))
    }

    fn save_state(&self, state: &mut AuthState, stage: &str) -> Result<String> {
        self.saved
            .lock()
            .map_err(|_| LoginError::Internal("poisoned".to_string()))?
            .push((state.clone(), stage.to_string()));
        Ok("someState".to_string())
    }

    fn delete_state(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Registry resolving every id to the same source.
pub struct FixedRegistry(pub Source);

impl AuthSourceRegistry for FixedRegistry {
    fn get(&self, _id: &str) -> Option<Source> {
        Some(self.0.clone())
    }
}

fn mail_attributes() -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("mail".to_string(), vec!["noreply@simplesamlphp.org".to_string()]);
    attributes
}

/// Accepts any non-empty credentials except the username `wrong`.
pub struct FakeUserPass {
    pub id: String,
    pub remember_username: bool,
    pub remember_me: bool,
    pub logins: Mutex<Vec<(String, String)>>,
}

impl FakeUserPass {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            remember_username: false,
            remember_me: false,
            logins: Mutex::new(Vec::new()),
        }
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl AuthSource for FakeUserPass {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, _state: &mut AuthState) -> Result<()> {
        Ok(())
    }

    fn remember_username_enabled(&self) -> bool {
        self.remember_username
    }

    fn remember_me_enabled(&self) -> bool {
        self.remember_me
    }
}

impl UserPassSource for FakeUserPass {
    fn login(&self, username: &str, password: &str) -> Result<Attributes> {
        if let Ok(mut logins) = self.logins.lock() {
            logins.push((username.to_string(), password.to_string()));
        }
        if username == "wrong" {
            return Err(LoginError::WrongUserPass);
        }
        Ok(mail_attributes())
    }
}

pub struct FakeUserPassOrg {
    pub id: String,
    pub method: UsernameOrgMethod,
    pub remember_organization: bool,
    pub logins: Mutex<Vec<(String, String)>>,
}

impl FakeUserPassOrg {
    pub fn new(id: &str, method: UsernameOrgMethod) -> Self {
        Self {
            id: id.to_string(),
            method,
            remember_organization: false,
            logins: Mutex::new(Vec::new()),
        }
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl AuthSource for FakeUserPassOrg {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, _state: &mut AuthState) -> Result<()> {
        Ok(())
    }
}

impl UserPassOrgSource for FakeUserPassOrg {
    fn remember_organization_enabled(&self) -> bool {
        self.remember_organization
    }

    fn login(&self, username: &str, _password: &str, organization: &str) -> Result<Attributes> {
        if let Ok(mut logins) = self.logins.lock() {
            logins.push((username.to_string(), organization.to_string()));
        }
        if organization != "ssp" {
            return Err(LoginError::WrongUserPass);
        }
        Ok(mail_attributes())
    }

    fn organizations(&self) -> Option<BTreeMap<String, String>> {
        Some(BTreeMap::from([("ssp".to_string(), "SimpleSAMLphp".to_string())]))
    }

    fn username_org_method(&self) -> UsernameOrgMethod {
        self.method
    }
}

pub fn controller(store: Arc<dyn AuthStateStore>, source: Source) -> Login {
    let mut login = Login::new(test_config()).unwrap();
    login.set_auth_state(store);
    login.set_auth_source(Arc::new(FixedRegistry(source)));
    login
}
