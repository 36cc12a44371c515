//! Authentication state storage.
//!
//! A login flow parks its in-progress data in the state store and hands the
//! browser an opaque identifier (`AuthState`). Each save is stamped with a
//! stage tag, and a load for a different stage is refused.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LoginError, Result};

/// In-progress authentication data, keyed by well-known names.
pub type AuthState = BTreeMap<String, Value>;

/// Authentication source that owns the state.
pub const AUTHID: &str = "core:UserPassBase.AuthId";
pub const STAGE_KEY: &str = "core:Auth.State.stage";
pub const ID_KEY: &str = "core:Auth.State.id";
pub const RESTART_URL_KEY: &str = "core:Auth.State.restartURL";
pub const ATTRIBUTES_KEY: &str = "Attributes";
pub const RETURN_URL_KEY: &str = "ReturnURL";
pub const REMEMBER_ME_KEY: &str = "RememberMe";
pub const AUTHN_INSTANT_KEY: &str = "AuthnInstant";
pub const FORCED_USERNAME_KEY: &str = "core:UserPassBase.forcedUsername";
pub const SELECTED_ORG_KEY: &str = "core:UserPassOrgBase.selectedOrg";

pub const USERPASS_STAGE: &str = "core:UserPassBase.state";
pub const USERPASS_ORG_STAGE: &str = "core:UserPassOrgBase.state";
pub const BASIC_STAGE: &str = "core:Auth.Source.state";

pub trait AuthStateStore: Send + Sync {
    /// Load the state saved under `id` by `stage`.
    ///
    /// A missing state yields `Ok(None)` when `allow_missing` is set and
    /// `LoginError::NoState` otherwise.
    fn load_state(&self, id: &str, stage: &str, allow_missing: bool) -> Result<Option<AuthState>>;

    /// Save `state` for `stage` and return the identifier to hand out.
    fn save_state(&self, state: &mut AuthState, stage: &str) -> Result<String>;

    fn delete_state(&self, id: &str) -> Result<()>;
}

/// Split a handed-out identifier into the store key and the restart URL.
pub fn split_state_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once(':') {
        Some((key, restart)) if !restart.is_empty() => (key, Some(restart)),
        Some((key, _)) => (key, None),
        None => (id, None),
    }
}

/// Build the identifier handed to the browser for a saved state.
pub fn state_id(state: &AuthState) -> Option<String> {
    let id = state.get(ID_KEY)?.as_str()?;
    match state.get(RESTART_URL_KEY).and_then(Value::as_str) {
        Some(restart) => Some(format!("{id}:{restart}")),
        None => Some(id.to_string()),
    }
}

struct Entry {
    state: AuthState,
    expires_at: DateTime<Utc>,
}

/// Process-local state store with per-entry expiry.
pub struct MemoryStateStore {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStateStore {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_STATE_TTL_SECS))
    }
}

impl AuthStateStore for MemoryStateStore {
    fn load_state(&self, id: &str, stage: &str, allow_missing: bool) -> Result<Option<AuthState>> {
        let (key, restart_url) = split_state_id(id);
        let entries = self.entries.read().map_err(|_| poisoned())?;

        let state = match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => entry.state.clone(),
            _ => {
                debug!(state_id = %key, "state not found or expired");
                if allow_missing {
                    return Ok(None);
                }
                return Err(LoginError::NoState {
                    restart_url: restart_url.map(str::to_string),
                });
            }
        };

        let actual = state.get(STAGE_KEY).and_then(Value::as_str).unwrap_or("");
        if actual != stage {
            return Err(LoginError::WrongStage {
                expected: stage.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(Some(state))
    }

    fn save_state(&self, state: &mut AuthState, stage: &str) -> Result<String> {
        let key = match state.get(ID_KEY).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = format!("_{}", Uuid::new_v4().simple());
                state.insert(ID_KEY.to_string(), Value::String(id.clone()));
                id
            }
        };
        state.insert(STAGE_KEY.to_string(), Value::String(stage.to_string()));

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(
            key.clone(),
            Entry {
                state: state.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );

        debug!(state_id = %key, stage, "saved authentication state");
        Ok(state_id(state).unwrap_or(key))
    }

    fn delete_state(&self, id: &str) -> Result<()> {
        let (key, _) = split_state_id(id);
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

fn poisoned() -> LoginError {
    LoginError::Internal("state store lock poisoned".to_string())
}
