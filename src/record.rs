//! Record
//!
//! A unit of stateful data with a sliding inactivity window. The owning
//! application holds the payload; this crate only tracks identity and
//! expiry policy.

/// A record with a bounded or unbounded lifetime.
///
/// The inactivity interval is signed: positive means sliding expiration,
/// zero means expire immediately (never persisted), negative means the
/// record is permanent and stays out of the expiration index entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Opaque unique identifier.
    pub id: String,

    /// Instant of last use, epoch milliseconds.
    pub last_activity_ms: u64,

    /// Maximum inactivity in seconds; see type docs for sign semantics.
    pub max_inactive_secs: i64,
}

impl Record {
    /// Create a record with the given activity time and inactivity window.
    pub fn new(id: impl Into<String>, last_activity_ms: u64, max_inactive_secs: i64) -> Self {
        Self {
            id: id.into(),
            last_activity_ms,
            max_inactive_secs,
        }
    }

    /// Record identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this record never expires.
    pub fn is_permanent(&self) -> bool {
        self.max_inactive_secs < 0
    }

    /// Whether this record must be removed as soon as it is seen.
    pub fn expires_immediately(&self) -> bool {
        self.max_inactive_secs == 0
    }

    /// Absolute expiry instant in epoch milliseconds, `None` for
    /// permanent records.
    pub fn expiry_time_ms(&self) -> Option<u64> {
        if self.is_permanent() {
            return None;
        }
        Some(
            self.last_activity_ms
                .saturating_add((self.max_inactive_secs as u64).saturating_mul(1_000)),
        )
    }

    /// Reset the activity clock, sliding the expiry window forward.
    pub fn refresh(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }
}
