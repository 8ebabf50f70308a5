//! # Synchronization Module
//!
//! The state partition the engine registers into the host store:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  <module_name>                                       │
//! │  ┌────────────┬────────────────────────────────────┐ │
//! │  │ uid        │ identity of this instance, or null │ │
//! │  │ isLeader   │ false until elected                │ │
//! │  └────────────┴────────────────────────────────────┘ │
//! │  mutations: SET_UID(string)  SET_IS_LEADER(bool)     │
//! │  actions:   setUid(uid)      setLeader()             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Its mutations are never broadcast.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SyncError, SyncResult};
use crate::store::StoreModule;

/// Assigns `uid`.
pub const SET_UID: &str = "SET_UID";

/// Assigns `isLeader`.
pub const SET_IS_LEADER: &str = "SET_IS_LEADER";

/// Commits `SET_IS_LEADER = true`.
pub const ACTION_SET_LEADER: &str = "setLeader";

/// Commits `SET_UID = payload`.
pub const ACTION_SET_UID: &str = "setUid";

/// State of the synchronization module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncModuleState {
    /// Identity of this instance.
    pub uid: Option<String>,

    /// Whether this instance won the election.
    pub is_leader: bool,
}

impl SyncModuleState {
    /// Decodes the state from its JSON form.
    pub fn from_value(value: Value) -> SyncResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Store module holding [`SyncModuleState`].
#[derive(Debug, Default)]
pub struct SyncModule {
    state: SyncModuleState,
}

impl SyncModule {
    /// Creates the module with an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn current(&self) -> &SyncModuleState {
        &self.state
    }
}

impl StoreModule for SyncModule {
    fn mutation_names(&self) -> Vec<String> {
        vec![SET_UID.to_string(), SET_IS_LEADER.to_string()]
    }

    fn commit(&mut self, name: &str, payload: &Value) -> SyncResult<()> {
        match name {
            SET_UID => {
                let uid = payload.as_str().ok_or_else(|| invalid(name, "expected a string"))?;
                self.state.uid = Some(uid.to_string());
            }
            SET_IS_LEADER => {
                self.state.is_leader =
                    payload.as_bool().ok_or_else(|| invalid(name, "expected a boolean"))?;
            }
            other => return Err(SyncError::UnknownMutation(other.to_string())),
        }
        Ok(())
    }

    fn action(&self, name: &str, payload: &Value) -> SyncResult<Vec<(String, Value)>> {
        match name {
            ACTION_SET_LEADER => Ok(vec![(SET_IS_LEADER.to_string(), Value::Bool(true))]),
            ACTION_SET_UID => Ok(vec![(SET_UID.to_string(), payload.clone())]),
            other => Err(SyncError::UnknownAction(other.to_string())),
        }
    }

    fn state(&self) -> Value {
        json!({
            "uid": self.state.uid,
            "isLeader": self.state.is_leader,
        })
    }
}

fn invalid(name: &str, reason: &str) -> SyncError {
    SyncError::InvalidPayload {
        mutation_type: name.to_string(),
        reason: reason.to_string(),
    }
}
