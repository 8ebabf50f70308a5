//! # Mutation Router
//!
//! Decides which local mutations leave the instance and which inbound
//! messages enter the store.
//!
//! ## Decision Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           OUTBOUND                                      │
//! │                                                                         │
//! │  committed mutation                                                     │
//! │        │                                                                │
//! │        ├─ origin Replayed? ──────────────────────────► drop (Replayed)  │
//! │        ├─ type not "<namespace>/<name>"? ────────────► drop (NoChannel) │
//! │        ├─ namespace == sync module? ─────────────────► drop             │
//! │        ├─ no scoped channel for namespace? ──────────► drop (NoChannel) │
//! │        ▼                                                                │
//! │  channel.last_message = mutation ; channel.send({from, value})          │
//! │                                                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                            INBOUND                                      │
//! │                                                                         │
//! │  frame                                                                  │
//! │        ├─ unknown channel / replaced generation? ───► drop              │
//! │        ├─ body not an envelope? ────────────────────► drop (warn)       │
//! │        ├─ type not on allow-list? ──────────────────► drop              │
//! │        ├─ same as channel.last_message? ────────────► drop (echo/dup)   │
//! │        ▼                                                                │
//! │  store.commit(value, Replayed{from}) ; channel.last_message = value     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every decision is returned as an outcome so the agent can count it.
//! Drops are never errors.

use tabcast_core::{Envelope, InstanceId};
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::protocol::InboundFrame;
use crate::registry::ChannelRegistry;
use crate::store::{CommittedMutation, HostStore, MutationOrigin};

/// Result of routing one local mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Broadcast on the named channel.
    Sent { channel: String },

    /// Replayed from a peer; never re-broadcast.
    Replayed,

    /// Belongs to the synchronization module.
    FromSyncModule,

    /// No scoped channel exists for the namespace.
    NoChannel,
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Committed into the store.
    Applied { from: InstanceId },

    /// Type not on the channel's allow-list.
    NotInScope,

    /// Same fingerprint as the channel's last message.
    Duplicate,

    /// Received by a channel that has since been replaced.
    Stale,

    /// No live channel with that name.
    UnknownChannel,

    /// Body is not a valid envelope.
    Malformed,
}

impl InboundOutcome {
    /// Returns true for outcomes that are echo or duplicate suppression.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, InboundOutcome::Duplicate)
    }
}

/// Routes mutations between the store and the channel registry.
pub struct MutationRouter {
    identity: InstanceId,
    sync_module: String,
    registry: ChannelRegistry,
}

impl MutationRouter {
    /// Creates a router for the instance `identity`.
    pub fn new(identity: InstanceId, sync_module: impl Into<String>, registry: ChannelRegistry) -> Self {
        MutationRouter {
            identity,
            sync_module: sync_module.into(),
            registry,
        }
    }

    /// Identity stamped on outbound envelopes.
    pub fn identity(&self) -> &InstanceId {
        &self.identity
    }

    /// The channel registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// The channel registry, mutably.
    pub fn registry_mut(&mut self) -> &mut ChannelRegistry {
        &mut self.registry
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Broadcasts a locally committed mutation if it is eligible.
    pub fn route_local(&mut self, event: &CommittedMutation) -> SyncResult<RouteOutcome> {
        let mutation = &event.mutation;

        if event.origin.is_replayed() {
            return Ok(RouteOutcome::Replayed);
        }

        let Ok(path) = mutation.type_path() else {
            debug!(mutation_type = %mutation.mutation_type, "Type is not namespaced, not broadcast");
            return Ok(RouteOutcome::NoChannel);
        };
        if path.namespace == self.sync_module {
            return Ok(RouteOutcome::FromSyncModule);
        }

        let Some(channel) = self
            .registry
            .get_mut(path.namespace)
            .filter(|channel| channel.is_scoped())
        else {
            debug!(mutation_type = %mutation.mutation_type, "No channel for mutation, not broadcast");
            return Ok(RouteOutcome::NoChannel);
        };

        channel.set_last_message(mutation);
        channel.send(&Envelope::new(self.identity.clone(), mutation.clone()))?;

        debug!(
            channel = %channel.name(),
            mutation_type = %mutation.mutation_type,
            "Mutation broadcast"
        );
        Ok(RouteOutcome::Sent {
            channel: channel.name().to_string(),
        })
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Decodes a frame from a module channel and applies it if accepted.
    pub fn accept_inbound<S>(&mut self, store: &mut S, frame: &InboundFrame) -> SyncResult<InboundOutcome>
    where
        S: HostStore + ?Sized,
    {
        if self.registry.get(&frame.channel).is_none() {
            return Ok(InboundOutcome::UnknownChannel);
        }
        if !self.registry.is_current(frame) {
            return Ok(InboundOutcome::Stale);
        }

        let envelope = match Envelope::from_json(&frame.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %frame.channel, error = %e, "Dropping malformed frame");
                return Ok(InboundOutcome::Malformed);
            }
        };

        self.accept_envelope(store, &frame.channel, envelope)
    }

    /// Applies a decoded envelope received on `channel_name` if accepted.
    pub fn accept_envelope<S>(
        &mut self,
        store: &mut S,
        channel_name: &str,
        envelope: Envelope,
    ) -> SyncResult<InboundOutcome>
    where
        S: HostStore + ?Sized,
    {
        let Some(channel) = self.registry.get_mut(channel_name) else {
            return Ok(InboundOutcome::UnknownChannel);
        };

        let value = &envelope.value;
        if !channel.is_scoped() || !channel.has_mutation(&value.mutation_type) {
            debug!(
                channel = %channel_name,
                mutation_type = %value.mutation_type,
                "Inbound mutation not in channel scope"
            );
            return Ok(InboundOutcome::NotInScope);
        }
        if channel.is_same_as_last(value) {
            debug!(
                channel = %channel_name,
                mutation_type = %value.mutation_type,
                from = %envelope.from,
                "Suppressed echo or duplicate"
            );
            return Ok(InboundOutcome::Duplicate);
        }

        store.commit(
            value.clone(),
            MutationOrigin::Replayed {
                from: envelope.from.clone(),
            },
        )?;
        channel.set_last_message(value);

        debug!(
            channel = %channel_name,
            mutation_type = %value.mutation_type,
            from = %envelope.from,
            "Applied inbound mutation"
        );
        Ok(InboundOutcome::Applied { from: envelope.from })
    }
}
