//! # Wire Envelope
//!
//! The unit of transfer on a module channel:
//! ```json
//! { "from": "1kd7a2f0-0", "value": { "type": "todos/pushTodo", "payload": { ... } } }
//! ```
//!
//! `from` tags the sending instance for diagnostics. Deduplication never
//! looks at it: only `value` is fingerprinted.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::identity::InstanceId;
use crate::mutation::{Fingerprint, Mutation};

/// A mutation wrapped with the identity of the instance that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Envelope {
    /// Sending instance.
    pub from: InstanceId,

    /// The mutation, replayed verbatim by receivers.
    pub value: Mutation,
}

impl Envelope {
    /// Wraps a mutation for sending.
    pub fn new(from: InstanceId, value: Mutation) -> Self {
        Envelope { from, value }
    }

    /// Fingerprint of the carried mutation.
    pub fn fingerprint(&self) -> Fingerprint {
        self.value.fingerprint()
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
