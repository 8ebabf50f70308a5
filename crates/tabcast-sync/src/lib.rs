//! # tabcast-sync: Synchronization Engine for tabcast
//!
//! Keeps independent copies of a mutation-driven store consistent across
//! several execution contexts (tabs, workers, processes) by re-broadcasting
//! mutations between peers and replaying the ones received.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncAgent (one task per instance)                │  │
//! │  │                                                                  │  │
//! │  │  Owns the host store, the router and the channel registry       │  │
//! │  │  Sequences commits, inbound frames and election events           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ MutationRouter │  │ChannelRegistry │  │  Elector               │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Eligibility,   │  │ One live       │  │ apply / tell / death   │    │
//! │  │ allow-lists,   │  │ channel per    │  │ on the coordination    │    │
//! │  │ echo and dup   │  │ name, epochs   │  │ channel, own task      │    │
//! │  │ suppression    │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COLLABORATOR BOUNDARIES:                                              │
//! │  • HostStore / StoreModule  (reference: MemoryStore)                   │
//! │  • Transport / Endpoint     (reference: memory::MemoryBus)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`agent`] - Per-instance `SyncAgent` and its handle
//! - [`router`] - Outbound eligibility and inbound acceptance
//! - [`registry`] - Channel lifetime and replacement
//! - [`channel`] - Named channel with allow-list and last-message slot
//! - [`election`] - Leader election over the coordination channel
//! - [`module`] - The `{ uid, isLeader }` store module
//!
//! ### Boundaries and Support
//! - [`store`] - Host store traits and `MemoryStore`
//! - [`transport`] - Transport traits and the in-memory bus
//! - [`protocol`] - Election messages and inbound frames
//! - [`config`] - Sync configuration (TOML + environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tabcast_sync::transport::memory::MemoryBus;
//! use tabcast_sync::{ContextKind, MemoryStore, SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let bus = MemoryBus::new();
//!
//! let handle = SyncAgent::init(config, MemoryStore::new(), bus.transport(ContextKind::Window))?
//!     .spawn();
//!
//! handle.commit("todos/pushTodo", serde_json::json!({ "_id": "a1", "value": "milk" })).await?;
//! println!("Leader: {}", handle.is_leader());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Engine
pub mod agent;
pub mod channel;
pub mod election;
pub mod module;
pub mod registry;
pub mod router;

// Boundaries and support
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentHandle, SyncEventEmitter, SyncStatus};
pub use channel::Channel;
pub use config::{ChannelSettings, ElectionSettings, SyncConfig};
pub use election::{ElectionConfig, ElectionHandle};
pub use error::{SyncError, SyncResult};
pub use module::{SyncModule, SyncModuleState};
pub use protocol::{ElectionMessage, InboundFrame};
pub use registry::ChannelRegistry;
pub use router::{InboundOutcome, MutationRouter, RouteOutcome};
pub use store::{CommittedMutation, HostStore, MemoryStore, MutationOrigin, StoreModule};
pub use transport::{ChannelOptions, ContextKind, DeliveryMode, Endpoint, Listener, Transport};
