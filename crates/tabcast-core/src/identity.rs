//! # Instance Identity
//!
//! Every running instance gets a short identity at construction time:
//! the wall-clock milliseconds in base 24, followed by a process-local
//! sequence number. Identities created in different processes during the
//! same millisecond can collide; the protocol tolerates that because it
//! never deduplicates by origin.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Radix used to render identities.
const IDENTITY_RADIX: u64 = 24;

/// Process-local sequence, keeps identities minted in one millisecond apart.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Short identity of one running instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, type = "string")]
pub struct InstanceId(String);

impl InstanceId {
    /// Generates a new time-based identity.
    pub fn generate() -> Self {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        InstanceId(format!(
            "{}-{}",
            to_radix(millis, IDENTITY_RADIX),
            to_radix(sequence, IDENTITY_RADIX)
        ))
    }

    /// Returns the identity text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        InstanceId(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        InstanceId(value)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders `value` in the given radix (2..=36) with lowercase digits.
fn to_radix(mut value: u64, radix: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        // radix <= 36, so the remainder always indexes DIGITS
        out.push(DIGITS[(value % radix) as usize]);
        value /= radix;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
