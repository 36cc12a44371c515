//! Example authentication sources configured from YAML.
//!
//! Users are listed inline as `"username:password"` keys with their
//! attributes. Meant for demos and tests, not for real deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    Attributes, AuthSource, LoginLink, Source, UserPassOrgSource, UserPassSource,
    UsernameOrgMethod,
};
use crate::error::{LoginError, Result};
use crate::state::{AuthState, ATTRIBUTES_KEY, AUTHID, AUTHN_INSTANT_KEY};

/// Attribute value as written in YAML: a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    One(String),
    Many(Vec<String>),
}

impl AttributeValue {
    fn into_values(self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

type RawAttributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormOptions {
    #[serde(default)]
    pub remember_username: bool,
    #[serde(default)]
    pub remember_username_checked: bool,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub remember_me_checked: bool,
    #[serde(default)]
    pub links: Vec<LoginLink>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "exampleauth:StaticSource")]
    Static { attributes: RawAttributes },

    #[serde(rename = "exampleauth:UserPass")]
    UserPass {
        #[serde(flatten)]
        form: FormOptions,
        users: BTreeMap<String, RawAttributes>,
    },

    #[serde(rename = "exampleauth:UserPassOrg")]
    UserPassOrg {
        #[serde(flatten)]
        form: FormOptions,
        #[serde(default)]
        username_org_method: UsernameOrgMethod,
        #[serde(default)]
        remember_organization: bool,
        #[serde(default)]
        remember_organization_checked: bool,
        organizations: BTreeMap<String, String>,
        /// Users per organization id.
        users: BTreeMap<String, BTreeMap<String, RawAttributes>>,
    },
}

impl SourceConfig {
    pub fn build(self, id: &str) -> Result<Source> {
        match self {
            Self::Static { attributes } => Ok(Source::Basic(Arc::new(StaticSource {
                id: id.to_string(),
                attributes: convert(attributes),
            }))),
            Self::UserPass { form, users } => Ok(Source::UserPass(Arc::new(StaticUserPass {
                id: id.to_string(),
                form,
                users: parse_users(id, users)?,
            }))),
            Self::UserPassOrg {
                form,
                username_org_method,
                remember_organization,
                remember_organization_checked,
                organizations,
                users,
            } => {
                let mut by_org = HashMap::new();
                for (org, org_users) in users {
                    if !organizations.contains_key(&org) {
                        return Err(LoginError::Configuration(format!(
                            "authentication source '{id}' lists users for unknown organization '{org}'"
                        )));
                    }
                    by_org.insert(org, parse_users(id, org_users)?);
                }
                Ok(Source::UserPassOrg(Arc::new(StaticUserPassOrg {
                    id: id.to_string(),
                    form,
                    username_org_method,
                    remember_organization,
                    remember_organization_checked,
                    organizations,
                    users: by_org,
                })))
            }
        }
    }
}

fn convert(raw: RawAttributes) -> Attributes {
    raw.into_iter()
        .map(|(name, value)| (name, value.into_values()))
        .collect()
}

fn parse_users(
    id: &str,
    users: BTreeMap<String, RawAttributes>,
) -> Result<HashMap<(String, String), Attributes>> {
    users
        .into_iter()
        .map(|(key, attributes)| match key.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok((
                (username.to_string(), password.to_string()),
                convert(attributes),
            )),
            _ => Err(LoginError::Configuration(format!(
                "invalid user '{key}' in authentication source '{id}', expected 'username:password'"
            ))),
        })
        .collect()
}

/// Stamp the state as authenticated by `id`.
fn finish(id: &str, state: &mut AuthState) {
    state.insert(AUTHID.to_string(), Value::String(id.to_string()));
    state.insert(AUTHN_INSTANT_KEY.to_string(), Value::from(Utc::now().timestamp()));
}

/// Source that authenticates everybody with a fixed attribute set.
pub struct StaticSource {
    id: String,
    attributes: Attributes,
}

impl AuthSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, state: &mut AuthState) -> Result<()> {
        state.insert(ATTRIBUTES_KEY.to_string(), serde_json::to_value(&self.attributes)?);
        finish(&self.id, state);
        Ok(())
    }
}

/// Username/password source with an inline user list.
pub struct StaticUserPass {
    id: String,
    form: FormOptions,
    users: HashMap<(String, String), Attributes>,
}

impl StaticUserPass {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            form: FormOptions::default(),
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, username: &str, password: &str, attributes: Attributes) -> Self {
        self.users
            .insert((username.to_string(), password.to_string()), attributes);
        self
    }

    pub fn with_remember_username(mut self, enabled: bool) -> Self {
        self.form.remember_username = enabled;
        self
    }
}

impl AuthSource for StaticUserPass {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, state: &mut AuthState) -> Result<()> {
        finish(&self.id, state);
        Ok(())
    }

    fn remember_username_enabled(&self) -> bool {
        self.form.remember_username
    }

    fn remember_username_checked(&self) -> bool {
        self.form.remember_username_checked
    }

    fn remember_me_enabled(&self) -> bool {
        self.form.remember_me
    }

    fn remember_me_checked(&self) -> bool {
        self.form.remember_me_checked
    }

    fn login_links(&self) -> Vec<LoginLink> {
        self.form.links.clone()
    }
}

impl UserPassSource for StaticUserPass {
    fn login(&self, username: &str, password: &str) -> Result<Attributes> {
        match self.users.get(&(username.to_string(), password.to_string())) {
            Some(attributes) => {
                info!(auth_source = %self.id, username, "login succeeded");
                Ok(attributes.clone())
            }
            None => {
                debug!(auth_source = %self.id, username, "wrong username or password");
                Err(LoginError::WrongUserPass)
            }
        }
    }
}

/// Organization-aware variant of [`StaticUserPass`].
pub struct StaticUserPassOrg {
    id: String,
    form: FormOptions,
    username_org_method: UsernameOrgMethod,
    remember_organization: bool,
    remember_organization_checked: bool,
    organizations: BTreeMap<String, String>,
    users: HashMap<String, HashMap<(String, String), Attributes>>,
}

impl StaticUserPassOrg {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            form: FormOptions::default(),
            username_org_method: UsernameOrgMethod::None,
            remember_organization: false,
            remember_organization_checked: false,
            organizations: BTreeMap::new(),
            users: HashMap::new(),
        }
    }

    pub fn with_organization(mut self, org: &str, name: &str) -> Self {
        self.organizations.insert(org.to_string(), name.to_string());
        self
    }

    pub fn with_user(
        mut self,
        org: &str,
        username: &str,
        password: &str,
        attributes: Attributes,
    ) -> Self {
        self.users
            .entry(org.to_string())
            .or_default()
            .insert((username.to_string(), password.to_string()), attributes);
        self
    }

    pub fn with_username_org_method(mut self, method: UsernameOrgMethod) -> Self {
        self.username_org_method = method;
        self
    }
}

impl AuthSource for StaticUserPassOrg {
    fn id(&self) -> &str {
        &self.id
    }

    fn authenticate(&self, state: &mut AuthState) -> Result<()> {
        finish(&self.id, state);
        Ok(())
    }

    fn remember_username_enabled(&self) -> bool {
        self.form.remember_username
    }

    fn remember_username_checked(&self) -> bool {
        self.form.remember_username_checked
    }

    fn remember_me_enabled(&self) -> bool {
        self.form.remember_me
    }

    fn remember_me_checked(&self) -> bool {
        self.form.remember_me_checked
    }

    fn login_links(&self) -> Vec<LoginLink> {
        self.form.links.clone()
    }
}

impl UserPassOrgSource for StaticUserPassOrg {
    fn login(&self, username: &str, password: &str, organization: &str) -> Result<Attributes> {
        let attributes = self
            .users
            .get(organization)
            .and_then(|users| users.get(&(username.to_string(), password.to_string())));

        match attributes {
            Some(attributes) => {
                info!(auth_source = %self.id, username, organization, "login succeeded");
                Ok(attributes.clone())
            }
            None => {
                debug!(auth_source = %self.id, username, organization, "wrong username or password");
                Err(LoginError::WrongUserPass)
            }
        }
    }

    fn organizations(&self) -> Option<BTreeMap<String, String>> {
        if self.organizations.is_empty() {
            None
        } else {
            Some(self.organizations.clone())
        }
    }

    fn username_org_method(&self) -> UsernameOrgMethod {
        self.username_org_method
    }

    fn remember_organization_enabled(&self) -> bool {
        self.remember_organization
    }

    fn remember_organization_checked(&self) -> bool {
        self.remember_organization_checked
    }
}
