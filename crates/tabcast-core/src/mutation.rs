//! # Mutations and Fingerprints
//!
//! A mutation is an atomic, named state change `{ type, payload }`. The
//! `type` is always `"<namespace>/<name>"`: the namespace selects the channel
//! a mutation travels on, the name selects the handler inside the module.
//!
//! ## Fingerprints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Canonical Fingerprint                              │
//! │                                                                         │
//! │  { type: "todos/pushTodo", payload: { value: "milk", _id: "a1" } }      │
//! │                              │                                          │
//! │                              ▼   object keys sorted, recursively        │
//! │  {"payload":{"_id":"a1","value":"milk"},"type":"todos/pushTodo"}        │
//! │                                                                         │
//! │  Two mutations are "the same message" iff their fingerprints are equal. │
//! │  Key order in the payload never matters; array order does.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::NAMESPACE_SEPARATOR;

// =============================================================================
// Mutation
// =============================================================================

/// An atomic, named state change applied to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Mutation {
    /// Fully qualified mutation type, `"<namespace>/<name>"`.
    #[serde(rename = "type")]
    pub mutation_type: String,

    /// Arbitrary JSON payload. Missing payloads decode as `null`.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub payload: Value,
}

impl Mutation {
    /// Creates a mutation from a fully qualified type and a payload.
    pub fn new(mutation_type: impl Into<String>, payload: Value) -> Self {
        Mutation {
            mutation_type: mutation_type.into(),
            payload,
        }
    }

    /// Creates a mutation from its namespace and name.
    pub fn namespaced(namespace: &str, name: &str, payload: Value) -> Self {
        Mutation::new(qualify(namespace, name), payload)
    }

    /// Returns the namespace, i.e. everything before the first `/`.
    ///
    /// A type without separator is its own namespace, which never matches a
    /// module channel's allow-list.
    pub fn namespace(&self) -> &str {
        self.mutation_type
            .split(NAMESPACE_SEPARATOR)
            .next()
            .unwrap_or_default()
    }

    /// Parses the type into a validated [`TypePath`].
    pub fn type_path(&self) -> CoreResult<TypePath<'_>> {
        TypePath::parse(&self.mutation_type)
    }

    /// Computes the canonical fingerprint of this mutation.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

// =============================================================================
// Type Path
// =============================================================================

/// A validated `"<namespace>/<name>"` mutation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePath<'a> {
    /// Module-qualifying prefix.
    pub namespace: &'a str,
    /// Mutation name inside the module.
    pub name: &'a str,
}

impl<'a> TypePath<'a> {
    /// Parses a mutation type containing exactly one separator.
    pub fn parse(mutation_type: &'a str) -> CoreResult<Self> {
        let mut parts = mutation_type.split(NAMESPACE_SEPARATOR);
        let namespace = parts.next().unwrap_or_default();
        let name = parts
            .next()
            .ok_or_else(|| CoreError::invalid_type(mutation_type, "missing namespace separator"))?;

        if parts.next().is_some() {
            return Err(CoreError::invalid_type(
                mutation_type,
                "nested namespaces are not supported",
            ));
        }
        if namespace.is_empty() || name.is_empty() {
            return Err(CoreError::invalid_type(mutation_type, "empty segment"));
        }

        Ok(TypePath { namespace, name })
    }
}

/// Joins a namespace and a mutation name into a fully qualified type.
pub fn qualify(namespace: &str, name: &str) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}{name}")
}

/// Checks that a channel, module or mutation name is usable as one segment
/// of a mutation type.
pub fn validate_segment(kind: &'static str, name: &str) -> CoreResult<()> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name.contains(NAMESPACE_SEPARATOR) {
        "must not contain '/'"
    } else {
        return Ok(());
    };

    Err(CoreError::InvalidName {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Canonical serialized form of a mutation, used only for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints a mutation (`type` + `payload`).
    pub fn of(mutation: &Mutation) -> Self {
        let canonical = json!({
            "payload": canonicalize(&mutation.payload),
            "type": mutation.mutation_type,
        });
        Fingerprint(canonical.to_string())
    }

    /// Returns the canonical text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuilds a JSON value with object keys inserted in sorted order.
///
/// Stays canonical even if serde_json's `preserve_order` feature gets
/// enabled somewhere in the dependency graph.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
