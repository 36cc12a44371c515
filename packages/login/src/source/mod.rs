//! Authentication sources.
//!
//! Sources are modelled as capability traits. A registry hands out a
//! [`Source`], which tags the capability set the source was registered with,
//! so a flow can check that the source it resolved can actually serve it.

pub mod example;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::AuthState;

pub use example::{SourceConfig, StaticSource, StaticUserPass, StaticUserPassOrg};

/// User attributes: attribute name to values.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Extra link shown underneath the login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginLink {
    pub href: String,
    pub text: String,
}

/// How a `user@org` username is treated by organization-aware sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsernameOrgMethod {
    /// The username is passed through unchanged.
    #[default]
    None,
    /// `user@org` selects the organization, a plain username is accepted.
    Allow,
    /// The organization must be given as part of the username.
    Force,
}

pub trait AuthSource: Send + Sync {
    fn id(&self) -> &str;

    /// Final hook once credentials have been accepted and the attributes are
    /// in the state.
    fn authenticate(&self, state: &mut AuthState) -> Result<()>;

    fn logout(&self, _state: &AuthState) {}

    fn remember_username_enabled(&self) -> bool {
        false
    }

    fn remember_username_checked(&self) -> bool {
        false
    }

    fn remember_me_enabled(&self) -> bool {
        false
    }

    fn remember_me_checked(&self) -> bool {
        false
    }

    fn login_links(&self) -> Vec<LoginLink> {
        Vec::new()
    }
}

pub trait UserPassSource: AuthSource {
    fn login(&self, username: &str, password: &str) -> Result<Attributes>;
}

pub trait UserPassOrgSource: AuthSource {
    fn login(&self, username: &str, password: &str, organization: &str) -> Result<Attributes>;

    /// Organizations to choose from, id to display name. `None` means the
    /// source does not offer a choice.
    fn organizations(&self) -> Option<BTreeMap<String, String>>;

    fn username_org_method(&self) -> UsernameOrgMethod {
        UsernameOrgMethod::None
    }

    fn remember_organization_enabled(&self) -> bool {
        false
    }

    fn remember_organization_checked(&self) -> bool {
        false
    }
}

/// A registered source, tagged with its capability set.
#[derive(Clone)]
pub enum Source {
    Basic(Arc<dyn AuthSource>),
    UserPass(Arc<dyn UserPassSource>),
    UserPassOrg(Arc<dyn UserPassOrgSource>),
}

impl Source {
    pub fn id(&self) -> &str {
        match self {
            Self::Basic(s) => s.id(),
            Self::UserPass(s) => s.id(),
            Self::UserPassOrg(s) => s.id(),
        }
    }

    pub fn logout(&self, state: &AuthState) {
        match self {
            Self::Basic(s) => s.logout(state),
            Self::UserPass(s) => s.logout(state),
            Self::UserPassOrg(s) => s.logout(state),
        }
    }

    pub fn capability(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::UserPass(_) => "username/password",
            Self::UserPassOrg(_) => "username/password/organization",
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id())
            .field("capability", &self.capability())
            .finish()
    }
}

pub trait AuthSourceRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Source>;
}

/// Registry backed by a map of configured sources.
#[derive(Default, Clone)]
pub struct SourceMap {
    sources: HashMap<String, Source>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Source) {
        self.sources.insert(source.id().to_string(), source);
    }

    pub fn with(mut self, source: Source) -> Self {
        self.insert(source);
        self
    }

    /// Parse a YAML document mapping source ids to source configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let configs: BTreeMap<String, SourceConfig> = serde_yaml_ng::from_str(yaml)?;
        let mut map = Self::new();
        for (id, config) in configs {
            map.insert(config.build(&id)?);
        }
        Ok(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let map = Self::from_yaml(&yaml)?;
        tracing::info!(path = %path.display(), sources = map.len(), "loaded authentication sources");
        Ok(map)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl AuthSourceRegistry for SourceMap {
    fn get(&self, id: &str) -> Option<Source> {
        self.sources.get(id).cloned()
    }
}
