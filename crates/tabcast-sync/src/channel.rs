//! # Message Channel
//!
//! A named broadcast endpoint for one synchronization group.
//!
//! ## Channel Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Channel "todos"                                 │
//! │                                                                         │
//! │  allow-list (fixed at creation)     last message (one mutable slot)     │
//! │  ┌───────────────────────────┐      ┌──────────────────────────────┐   │
//! │  │ todos/pushTodo            │      │ {"payload":{..},"type":..}   │   │
//! │  │ todos/removeTodo          │      │ fingerprint, or empty        │   │
//! │  └───────────────────────────┘      └──────────────────────────────┘   │
//! │                                                                         │
//! │  endpoint ──► transport (send / listen / close)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The slot holds the fingerprint of the last mutation sent or accepted on
//! this channel. An inbound message equal to it is an echo or a duplicate.

use std::fmt;

use serde::Serialize;
use tabcast_core::{Envelope, Fingerprint, ModuleDeclaration, Mutation};
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};
use crate::transport::{ChannelOptions, Endpoint, Listener, Transport};

/// One open broadcast channel.
pub struct Channel {
    name: String,
    options: ChannelOptions,
    mutation_names: Vec<String>,
    scoped: bool,
    last_message: Option<Fingerprint>,
    endpoint: Box<dyn Endpoint>,
}

impl Channel {
    /// Opens a channel bound to `name`.
    ///
    /// With a scope the allow-list is `"<name>/<mutation>"` for every declared
    /// mutation, in declaration order. Without one it is empty.
    pub fn create(
        transport: &dyn Transport,
        name: &str,
        options: &ChannelOptions,
        scope: Option<&ModuleDeclaration>,
    ) -> SyncResult<Self> {
        let endpoint = transport.open(name, options)?;
        let mutation_names = scope
            .map(|declaration| declaration.qualified_mutations(name))
            .unwrap_or_default();

        debug!(
            channel = %name,
            scoped = scope.is_some(),
            mutations = mutation_names.len(),
            "Channel created"
        );

        Ok(Channel {
            name: name.to_string(),
            options: *options,
            mutation_names,
            scoped: scope.is_some(),
            last_message: None,
            endpoint,
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the channel was opened with.
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Read-only view of the allow-list.
    pub fn mutation_names(&self) -> &[String] {
        &self.mutation_names
    }

    /// Whether a scope was supplied at creation. Only scoped channels carry
    /// mutation traffic.
    pub fn is_scoped(&self) -> bool {
        self.scoped
    }

    /// Returns true if `mutation_type` is on the allow-list.
    pub fn has_mutation(&self, mutation_type: &str) -> bool {
        self.mutation_names.iter().any(|name| name == mutation_type)
    }

    /// Returns true if `mutation` has the same fingerprint as the last
    /// message. Always false while the slot is empty.
    pub fn is_same_as_last(&self, mutation: &Mutation) -> bool {
        self.last_message
            .as_ref()
            .is_some_and(|last| *last == mutation.fingerprint())
    }

    /// Fingerprint of the last message, if any.
    pub fn last_message(&self) -> Option<&Fingerprint> {
        self.last_message.as_ref()
    }

    /// Records `mutation` as the last message.
    pub fn set_last_message(&mut self, mutation: &Mutation) {
        self.last_message = Some(mutation.fingerprint());
    }

    /// Posts an envelope to the other endpoints. Leaves the slot untouched.
    pub fn send(&self, envelope: &Envelope) -> SyncResult<()> {
        self.post(envelope)
    }

    /// Serializes any message to JSON and posts it.
    pub fn post<T: Serialize>(&self, message: &T) -> SyncResult<()> {
        if self.endpoint.is_closed() {
            return Err(SyncError::ChannelClosed(self.name.clone()));
        }
        let frame = serde_json::to_string(message)?;
        trace!(channel = %self.name, bytes = frame.len(), "Posting frame");
        self.endpoint.post(&frame)
    }

    /// Registers the inbound listener.
    pub fn listen(&mut self, listener: Listener) {
        self.endpoint.listen(listener);
    }

    /// Detaches the inbound listener.
    pub fn remove_listeners(&mut self) {
        self.endpoint.remove_listeners();
    }

    /// Removes listeners and releases the endpoint. Idempotent.
    pub fn close(&mut self) {
        if self.endpoint.is_closed() {
            return;
        }
        self.endpoint.remove_listeners();
        self.endpoint.close();
        debug!(channel = %self.name, "Channel closed");
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("mutation_names", &self.mutation_names)
            .field("scoped", &self.scoped)
            .field("last_message", &self.last_message)
            .field("closed", &self.is_closed())
            .finish()
    }
}
