//! # Sync Error Types
//!
//! Errors surfaced by the synchronization engine.
//!
//! ## What Is NOT an Error
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Silent Drops vs. Errors                              │
//! │                                                                         │
//! │  SILENT DROP (logged at debug, counted in SyncStatus)                   │
//! │  ─────────────────────────────────────────────────                     │
//! │  • Mutation from a module with no broadcast channel                    │
//! │  • Mutation from the sync module itself                                │
//! │  • Mutation replayed from a peer                                       │
//! │  • Inbound message outside the channel's allow-list                    │
//! │  • Inbound message identical to the channel's last message             │
//! │                                                                         │
//! │  ERROR (returned to the caller)                                        │
//! │  ──────────────────────────────                                        │
//! │  • Transport faults (open / send)                                      │
//! │  • Configuration problems                                              │
//! │  • Store rejections (unknown module, mutation, bad payload)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tabcast_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Protocol vocabulary violation (bad mutation type or name).
    #[error(transparent)]
    Protocol(#[from] CoreError),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The transport failed to open, send or receive.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Send attempted on a closed channel.
    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// No module registered under this namespace.
    #[error("Unknown store module: {0}")]
    UnknownModule(String),

    /// Module exists but does not define this mutation.
    #[error("Unknown mutation: {0}")]
    UnknownMutation(String),

    /// Module exists but does not define this action.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A module with this name is already registered.
    #[error("Store module already registered: {0}")]
    ModuleAlreadyRegistered(String),

    /// Payload has the wrong shape for the mutation.
    #[error("Invalid payload for {mutation_type}: {reason}")]
    InvalidPayload {
        mutation_type: String,
        reason: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error came from the transport collaborator.
    ///
    /// The engine never retries these; the caller decides.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::ChannelClosed(_))
    }

    /// Returns true if the host store rejected the operation.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownModule(_)
                | SyncError::UnknownMutation(_)
                | SyncError::UnknownAction(_)
                | SyncError::ModuleAlreadyRegistered(_)
                | SyncError::InvalidPayload { .. }
        )
    }
}
