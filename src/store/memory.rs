//! In-Memory Backing Store
//!
//! DashMap-backed engine with lazy per-entry TTL and set collections.
//! Expired entries are reclaimed when a probe lands on them, the same way
//! a remote engine with lazy expiry behaves, and every reclaimed key is
//! journaled so callers can observe expiry events.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::StoreError;

use super::BackingStore;

#[derive(Debug, Clone)]
enum Value {
    Blob(Bytes),
    Set(HashSet<Bytes>),
}

/// Entry in the store with value and expiration
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn blob(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value: Value::Blob(value),
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn empty_set() -> Self {
        Self {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() > t).unwrap_or(false)
    }
}

/// Thread-safe in-memory key-value engine with TTL and set support.
///
/// Cloning is cheap and shares the underlying map. Useful as an embedded
/// engine and as the test double for policy tests.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<Bytes, Entry>>,
    reclaimed: Arc<Mutex<Vec<Bytes>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            reclaimed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Remove the entry if its TTL has passed, journaling the key.
    /// Returns true if an expired entry was reclaimed.
    fn purge_if_expired(&self, key: &Bytes) -> bool {
        if self
            .inner
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            self.reclaimed.lock().unwrap().push(key.clone());
            true
        } else {
            false
        }
    }

    /// Remove every expired entry, returns count of removed keys.
    pub fn reclaim_expired(&self) -> usize {
        let mut removed = Vec::new();
        self.inner.retain(|key, entry| {
            if entry.is_expired() {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        let count = removed.len();
        self.reclaimed.lock().unwrap().extend(removed);
        count
    }

    /// Drain the journal of keys reclaimed by TTL so far.
    pub fn take_reclaimed(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.reclaimed.lock().unwrap())
    }

    /// Number of live entries (expired-but-unreclaimed included).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &Bytes) -> Result<Option<Bytes>, StoreError> {
        self.purge_if_expired(key);
        Ok(self.inner.get(key).and_then(|entry| match &entry.value {
            Value::Blob(b) => Some(b.clone()),
            Value::Set(_) => None,
        }))
    }

    async fn set_with_ttl(
        &self,
        key: Bytes,
        value: Bytes,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let entry = Entry::blob(value, Some(Duration::from_secs(ttl_secs)));
        self.inner.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &Bytes) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &Bytes) -> Result<bool, StoreError> {
        if self.purge_if_expired(key) {
            return Ok(false);
        }
        Ok(self.inner.contains_key(key))
    }

    async fn set_add(&self, collection: &Bytes, member: Bytes) -> Result<(), StoreError> {
        self.purge_if_expired(collection);
        let mut entry = self
            .inner
            .entry(collection.clone())
            .or_insert_with(Entry::empty_set);
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member);
                Ok(())
            }
            Value::Blob(_) => Err(StoreError::unavailable(
                "set_add",
                "existing value is not a set",
            )),
        }
    }

    async fn set_remove(&self, collection: &Bytes, member: &Bytes) -> Result<(), StoreError> {
        self.purge_if_expired(collection);
        let mut drop_collection = false;
        if let Some(mut entry) = self.inner.get_mut(collection) {
            if let Value::Set(members) = &mut entry.value {
                members.remove(member);
                drop_collection = members.is_empty();
            }
        }
        // engines drop a set when its last member goes
        if drop_collection {
            self.inner.remove(collection);
        }
        Ok(())
    }

    async fn set_members(&self, collection: &Bytes) -> Result<Vec<Bytes>, StoreError> {
        self.purge_if_expired(collection);
        Ok(self
            .inner
            .get(collection)
            .map(|entry| match &entry.value {
                Value::Set(members) => members.iter().cloned().collect(),
                Value::Blob(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn set_expire(&self, key: &Bytes, ttl_secs: u64) -> Result<(), StoreError> {
        self.purge_if_expired(key);
        if let Some(mut entry) = self.inner.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &Bytes) -> Result<(), StoreError> {
        self.inner.remove(collection);
        Ok(())
    }
}
