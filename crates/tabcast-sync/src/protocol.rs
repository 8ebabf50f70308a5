//! # Engine Messages
//!
//! Two kinds of text travel over channels:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Channel Traffic                                  │
//! │                                                                         │
//! │  module channel ("todos")        coordination channel ("tabcast")       │
//! │  ─────────────────────────       ────────────────────────────────       │
//! │  Envelope                        ElectionMessage                        │
//! │  {"from":..,"value":{..}}        {"action":"apply","token":"..."}      │
//! │                                  {"action":"tell", "token":"..."}      │
//! │                                  {"action":"death","token":"..."}      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Listeners never decode anything themselves: they hand the raw text to the
//! agent as an [`InboundFrame`] tagged with the channel generation that
//! received it.

use serde::{Deserialize, Serialize};

// =============================================================================
// Election Messages
// =============================================================================

/// Message exchanged on the coordination channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ElectionMessage {
    /// "I want to lead."
    Apply { token: String },

    /// "I am the leader."
    Tell { token: String },

    /// "The leader is stepping down."
    Death { token: String },
}

impl ElectionMessage {
    /// Token of the elector that sent this message.
    pub fn token(&self) -> &str {
        match self {
            ElectionMessage::Apply { token }
            | ElectionMessage::Tell { token }
            | ElectionMessage::Death { token } => token,
        }
    }

    /// Lowercase action name, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            ElectionMessage::Apply { .. } => "apply",
            ElectionMessage::Tell { .. } => "tell",
            ElectionMessage::Death { .. } => "death",
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Raw text received by a channel listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Name of the receiving channel.
    pub channel: String,

    /// Generation of the receiving channel inside the registry.
    pub epoch: u64,

    /// Undecoded frame text.
    pub body: String,
}

impl InboundFrame {
    /// Creates a frame.
    pub fn new(channel: impl Into<String>, epoch: u64, body: impl Into<String>) -> Self {
        InboundFrame {
            channel: channel.into(),
            epoch,
            body: body.into(),
        }
    }
}
