//! Error Types
//!
//! Failures surfaced by the backing store capability surface.

use thiserror::Error;

/// Errors returned by [`crate::store::BackingStore`] operations.
///
/// An unreachable or failing engine is the only hard error in this crate.
/// A bucket member that refers to a record already deleted or refreshed
/// elsewhere is expected and resolved as a silent no-op, never an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine rejected or failed the operation (network, timeout,
    /// wrong value kind for the requested primitive).
    #[error("backing store unavailable during {op}: {reason}")]
    Unavailable { op: &'static str, reason: String },

    /// Transport-level I/O failure.
    #[error("backing store i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            reason: reason.into(),
        }
    }
}
