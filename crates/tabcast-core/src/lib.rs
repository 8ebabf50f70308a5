//! # tabcast-core: Pure Protocol Types for tabcast
//!
//! This crate holds the vocabulary every tabcast peer agrees on. It contains
//! no I/O: channels, transports and the event loop live in `tabcast-sync`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        tabcast Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Application (tabs, workers)                     │   │
//! │  │        commit("todos/pushTodo", {...}) ──► host store           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tabcast-sync (engine)                        │   │
//! │  │    router ──► registry ──► channel ──► transport                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tabcast-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ mutation  │  │ envelope  │  │ identity  │  │  module   │  │   │
//! │  │   │ Mutation  │  │ Envelope  │  │InstanceId │  │ Catalog   │  │   │
//! │  │   │Fingerprint│  │           │  │           │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO CHANNELS • NO RUNTIME                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`mutation`] - `Mutation`, type paths and canonical `Fingerprint`s
//! - [`envelope`] - the `{ from, value }` wire envelope
//! - [`identity`] - time-based `InstanceId`
//! - [`module`] - declared module capabilities (`ModuleCatalog`)
//! - [`error`] - protocol error types
//!
//! ## Example Usage
//!
//! ```rust
//! use serde_json::json;
//! use tabcast_core::{Envelope, InstanceId, Mutation};
//!
//! let mutation = Mutation::new("todos/pushTodo", json!({ "_id": "a1", "value": "buy milk" }));
//! assert_eq!(mutation.namespace(), "todos");
//!
//! let envelope = Envelope::new(InstanceId::generate(), mutation.clone());
//! assert_eq!(envelope.value.fingerprint(), mutation.fingerprint());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod envelope;
pub mod error;
pub mod identity;
pub mod module;
pub mod mutation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use envelope::Envelope;
pub use error::{CoreError, CoreResult};
pub use identity::InstanceId;
pub use module::{ModuleCatalog, ModuleDeclaration};
pub use mutation::{Fingerprint, Mutation, TypePath};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Separator between the namespace and the mutation name in a mutation type.
///
/// `"todos/pushTodo"` has namespace `todos` and name `pushTodo`.
pub const NAMESPACE_SEPARATOR: char = '/';
