//! Backing Store
//!
//! Narrow capability surface over a key-value engine with per-key TTL and
//! set-collection primitives. Any engine that can implement these nine
//! operations can back the expiration policy; no other engine feature is
//! assumed.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

/// Capability surface consumed by the expiration policy.
///
/// Every operation is a single atomic engine call; the policy never needs
/// read-modify-write across calls. Implementations are shared across tasks,
/// so all methods take `&self`.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Get a value, `None` if the key is absent or already expired.
    async fn get(&self, key: &Bytes) -> Result<Option<Bytes>, StoreError>;

    /// Write a value with a TTL in seconds.
    async fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl_secs: u64)
        -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &Bytes) -> Result<(), StoreError>;

    /// Existence probe. This is the "touch" primitive: probing a key forces
    /// an engine with lazy expiry to evaluate (and evict) it now.
    async fn exists(&self, key: &Bytes) -> Result<bool, StoreError>;

    /// Add a member to a set collection, creating the collection if absent.
    async fn set_add(&self, collection: &Bytes, member: Bytes) -> Result<(), StoreError>;

    /// Remove a member from a set collection. Removing a non-member (or
    /// from an absent collection) is a no-op.
    async fn set_remove(&self, collection: &Bytes, member: &Bytes) -> Result<(), StoreError>;

    /// Enumerate all members of a set collection; empty if absent.
    async fn set_members(&self, collection: &Bytes) -> Result<Vec<Bytes>, StoreError>;

    /// Set or refresh the TTL of an existing key, plain or collection,
    /// without touching its value. No-op if the key is absent.
    async fn set_expire(&self, key: &Bytes, ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete a whole set collection. No-op if absent.
    async fn delete_collection(&self, collection: &Bytes) -> Result<(), StoreError>;
}
