//! # Host Store Boundary
//!
//! The engine synchronizes a mutation-driven store it does not own. This
//! module states what it needs from that store and ships [`MemoryStore`], a
//! small reference implementation.
//!
//! ## Commit Notification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Committed Mutation Events                            │
//! │                                                                         │
//! │  commit(todos/pushTodo, Local)              ──► subscriber receives     │
//! │                                                 { mutation, Local }     │
//! │                                                                         │
//! │  commit(todos/pushTodo, Replayed{from: x})  ──► subscriber receives     │
//! │                                                 { mutation, Replayed }  │
//! │                                                                         │
//! │  The origin rides next to the mutation, never inside the payload, and  │
//! │  never reaches the wire.                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde_json::Value;
use tabcast_core::{InstanceId, Mutation};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Events
// =============================================================================

/// Where a committed mutation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOrigin {
    /// Committed by code running in this instance.
    Local,

    /// Replayed from a peer's broadcast.
    Replayed { from: InstanceId },
}

impl MutationOrigin {
    /// Returns true for mutations replayed from a peer.
    pub fn is_replayed(&self) -> bool {
        matches!(self, MutationOrigin::Replayed { .. })
    }
}

/// Notification emitted after a mutation has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedMutation {
    /// The applied mutation.
    pub mutation: Mutation,

    /// Its origin.
    pub origin: MutationOrigin,
}

// =============================================================================
// Traits
// =============================================================================

/// A state partition registered into a host store.
pub trait StoreModule: Send {
    /// Unqualified names of the mutations this module handles.
    fn mutation_names(&self) -> Vec<String>;

    /// Applies the mutation `name`.
    fn commit(&mut self, name: &str, payload: &Value) -> SyncResult<()>;

    /// Runs the action `name` and returns the mutations it commits, as
    /// `(unqualified name, payload)` pairs.
    fn action(&self, name: &str, payload: &Value) -> SyncResult<Vec<(String, Value)>>;

    /// Current state as JSON.
    fn state(&self) -> Value;
}

/// What the engine requires from the host state store.
pub trait HostStore: Send + 'static {
    /// Returns a receiver of every mutation applied from now on.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CommittedMutation>;

    /// Applies a fully qualified mutation.
    fn commit(&mut self, mutation: Mutation, origin: MutationOrigin) -> SyncResult<()>;

    /// Runs the action `"<module>/<action>"`.
    ///
    /// The action's commits are applied in order. A commit rejected by its
    /// module stops the sequence; commits already applied stay applied.
    fn dispatch(&mut self, action_type: &str, payload: Value) -> SyncResult<()>;

    /// Registers a module under `name`.
    fn register_module(&mut self, name: &str, module: Box<dyn StoreModule>) -> SyncResult<()>;

    /// State of the module `name`.
    fn module_state(&self, name: &str) -> Option<Value>;
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory host store made of boxed [`StoreModule`]s.
#[derive(Default)]
pub struct MemoryStore {
    modules: BTreeMap<String, Box<dyn StoreModule>>,
    subscribers: Vec<mpsc::UnboundedSender<CommittedMutation>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module, builder style.
    pub fn with_module(mut self, name: &str, module: impl StoreModule + 'static) -> SyncResult<Self> {
        self.register_module(name, Box::new(module))?;
        Ok(self)
    }

    /// Names of the registered modules.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Checks that `mutation` targets a registered module and a mutation it
    /// declares.
    fn check_declared(&self, mutation: &Mutation) -> SyncResult<()> {
        let path = mutation.type_path()?;
        let module = self
            .modules
            .get(path.namespace)
            .ok_or_else(|| SyncError::UnknownModule(path.namespace.to_string()))?;

        if !module.mutation_names().iter().any(|name| name == path.name) {
            return Err(SyncError::UnknownMutation(mutation.mutation_type.clone()));
        }
        Ok(())
    }

    fn notify(&mut self, event: CommittedMutation) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl HostStore for MemoryStore {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CommittedMutation> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn commit(&mut self, mutation: Mutation, origin: MutationOrigin) -> SyncResult<()> {
        self.check_declared(&mutation)?;
        let path = mutation.type_path()?;
        let module = self
            .modules
            .get_mut(path.namespace)
            .ok_or_else(|| SyncError::UnknownModule(path.namespace.to_string()))?;
        module.commit(path.name, &mutation.payload)?;

        trace!(mutation_type = %mutation.mutation_type, ?origin, "Mutation applied");
        self.notify(CommittedMutation { mutation, origin });
        Ok(())
    }

    fn dispatch(&mut self, action_type: &str, payload: Value) -> SyncResult<()> {
        let action = Mutation::new(action_type, Value::Null);
        let path = action.type_path()?;
        let module = self
            .modules
            .get(path.namespace)
            .ok_or_else(|| SyncError::UnknownModule(path.namespace.to_string()))?;

        let namespace = path.namespace.to_string();
        let commits: Vec<Mutation> = module
            .action(path.name, &payload)?
            .into_iter()
            .map(|(name, payload)| Mutation::namespaced(&namespace, &name, payload))
            .collect();

        // An undeclared commit rejects the whole action before anything applies.
        for mutation in &commits {
            self.check_declared(mutation)?;
        }
        for mutation in commits {
            self.commit(mutation, MutationOrigin::Local)?;
        }
        Ok(())
    }

    fn register_module(&mut self, name: &str, module: Box<dyn StoreModule>) -> SyncResult<()> {
        tabcast_core::mutation::validate_segment("module", name)?;
        if self.modules.contains_key(name) {
            return Err(SyncError::ModuleAlreadyRegistered(name.to_string()));
        }
        self.modules.insert(name.to_string(), module);
        Ok(())
    }

    fn module_state(&self, name: &str) -> Option<Value> {
        self.modules.get(name).map(|module| module.state())
    }
}
