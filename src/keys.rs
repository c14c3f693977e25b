//! Key Naming & Bucket Math
//!
//! Stable, collision-free key derivation for live records, pending-expiry
//! markers, and minute-granularity expiration buckets, plus the minute
//! rounding helpers the reconciler is built on.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// One minute in milliseconds; bucket keys are aligned to this.
pub const MINUTE_MS: u64 = 60_000;

/// Round up to the next whole minute boundary.
///
/// An instant already on a boundary still advances to the following
/// minute, so a record expiring exactly at `12:00:00.000` lands in the
/// `12:01` bucket and is only swept after its expiry has passed.
#[inline]
pub fn ceil_to_next_minute(ms: u64) -> u64 {
    (ms / MINUTE_MS + 1).saturating_mul(MINUTE_MS)
}

/// Round down to the start of the current minute.
#[inline]
pub fn floor_to_minute(ms: u64) -> u64 {
    ms - ms % MINUTE_MS
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Key derivation for one namespace.
///
/// Three key families share the namespace and never collide:
/// - live record key: `{ns}:records:{id}`
/// - pending-expiry key: `{ns}:records:expires:{id}`
/// - bucket key: `{ns}:expirations:{minute_ms}`
#[derive(Debug, Clone)]
pub struct KeySpace {
    namespace: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("bucketsweep")
    }
}

impl KeySpace {
    /// Create a key space under the given namespace prefix.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key holding a record's live data. Owned by the application layer;
    /// the policy only ever adjusts its TTL or deletes it.
    pub fn record_key(&self, id: &str) -> Bytes {
        Bytes::from(format!("{}:records:{}", self.namespace, id))
    }

    /// Marker key whose own expiry fires at the record's nominal expiry
    /// instant. Distinct from the live key so touching it never reads the
    /// record's data.
    pub fn pending_expiry_key(&self, id: &str) -> Bytes {
        Bytes::from(format!("{}:records:expires:{}", self.namespace, id))
    }

    /// Set collection holding the pending-expiry keys due in the minute
    /// starting at `minute_ms` (epoch millis, multiple of [`MINUTE_MS`]).
    pub fn bucket_key(&self, minute_ms: u64) -> Bytes {
        Bytes::from(format!("{}:expirations:{}", self.namespace, minute_ms))
    }
}
