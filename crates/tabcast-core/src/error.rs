//! # Protocol Error Types
//!
//! Errors raised while validating protocol vocabulary. Everything here is a
//! caller mistake (a malformed type path, an unusable name); nothing in this
//! crate can fail because of I/O.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Protocol vocabulary errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A mutation type is not of the form `<namespace>/<name>`.
    ///
    /// ## When This Occurs
    /// - Root-level mutation types without a namespace (`"increment"`)
    /// - Nested paths (`"cart/items/add"`)
    /// - Empty segments (`"/add"`, `"cart/"`)
    #[error("Invalid mutation type '{mutation_type}': {reason}")]
    InvalidMutationType {
        mutation_type: String,
        reason: String,
    },

    /// A channel, module or mutation name cannot be used.
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidMutationType`].
    pub fn invalid_type(mutation_type: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidMutationType {
            mutation_type: mutation_type.to_string(),
            reason: reason.into(),
        }
    }
}
