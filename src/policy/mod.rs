//! Expiration Policy
//!
//! Maintains the minute-bucket expiration index as records are created,
//! refreshed and deleted, and performs the reconciliation sweep that turns
//! the engine's lazy expiry into prompt, observable eviction.
//!
//! Expiration is deliberately redundant: every live key and every bucket
//! carries its own backstop TTL (nominal expiry plus a safety margin), so
//! even if no sweep ever runs the engine reclaims stale data on its own.
//! The sweep only restores timeliness, never correctness.

mod sweeper;

pub use sweeper::{Sweeper, SweeperConfig};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::keys::{ceil_to_next_minute, floor_to_minute, now_millis, KeySpace};
use crate::record::Record;
use crate::store::BackingStore;

/// Upper bound on in-flight touches during one sweep.
const TOUCH_CONCURRENCY: usize = 16;

/// Expiration policy configuration
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Namespace prefix for all derived keys
    pub namespace: String,

    /// Extra TTL beyond nominal expiry on live keys and buckets, so the
    /// engine reclaims them even if reconciliation never runs
    pub safety_margin: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            namespace: "bucketsweep".to_string(),
            safety_margin: Duration::from_secs(300),
        }
    }
}

impl PolicyConfig {
    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the backstop safety margin
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }
}

/// Core expiration reconciler over a [`BackingStore`].
///
/// Mutation paths (`on_create_or_refresh`, `on_delete`) are safe to call
/// concurrently for different record ids; calls for the same id are
/// expected to be serialized by the application layer. All cross-call
/// state lives in the backing store, so a process restart loses nothing.
pub struct ExpirationPolicy<S> {
    store: S,
    keys: KeySpace,
    safety_margin_secs: u64,
}

impl<S: BackingStore> ExpirationPolicy<S> {
    /// Create a policy with the default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, PolicyConfig::default())
    }

    /// Create a policy with a custom configuration
    pub fn with_config(store: S, config: PolicyConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.namespace),
            safety_margin_secs: config.safety_margin.as_secs(),
        }
    }

    /// The backing store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The key space this policy derives keys from.
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Re-index a record after its activity time or inactivity interval
    /// changed.
    ///
    /// `previous_expiry_ms` is the record's absolute expiry before this
    /// change, `None` for a newly created record. Passing it lets the
    /// policy move the record's pending-expiry key out of its old minute
    /// bucket, keeping the single-bucket invariant.
    ///
    /// Store failures propagate; the policy does not retry.
    pub async fn on_create_or_refresh(
        &self,
        record: &Record,
        previous_expiry_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let pending = self.keys.pending_expiry_key(record.id());

        let new_bucket_ms = if record.max_inactive_secs > 0 {
            record.expiry_time_ms().map(ceil_to_next_minute)
        } else {
            None
        };

        if let Some(prev_ms) = previous_expiry_ms {
            let old_bucket_ms = ceil_to_next_minute(prev_ms);
            if new_bucket_ms != Some(old_bucket_ms) {
                let old_bucket = self.keys.bucket_key(old_bucket_ms);
                self.store.set_remove(&old_bucket, &pending).await?;
            }
        }

        if record.is_permanent() {
            // a pending key from an earlier sliding window would still
            // expire at its old nominal instant and fire a spurious
            // notification for a record that no longer expires
            self.store.delete(&pending).await?;
            trace!(id = record.id(), "permanent record, excluded from index");
            return Ok(());
        }

        let live = self.keys.record_key(record.id());

        if record.expires_immediately() {
            self.store.delete(&pending).await?;
            self.store.delete(&live).await?;
            debug!(id = record.id(), "zero inactivity interval, record deleted");
            return Ok(());
        }

        if let Some(bucket_ms) = new_bucket_ms {
            let ttl_secs = record.max_inactive_secs as u64;
            let ttl_with_margin = ttl_secs + self.safety_margin_secs;
            let bucket = self.keys.bucket_key(bucket_ms);

            self.store.set_add(&bucket, pending.clone()).await?;
            self.store.set_expire(&bucket, ttl_with_margin).await?;

            // The pending key expires at the nominal instant and is what
            // drives the engine's expiry notification; the live key
            // outlives it by the safety margin so the sweep, not the
            // engine's clock, decides when eviction becomes observable.
            self.store
                .set_with_ttl(pending, Bytes::new(), ttl_secs)
                .await?;
            self.store.set_expire(&live, ttl_with_margin).await?;

            debug!(
                id = record.id(),
                bucket_ms, ttl_secs, "record indexed for expiration"
            );
        }

        Ok(())
    }

    /// Drop a deleted record's index entry.
    ///
    /// Idempotent: removing a record that was never indexed, or whose
    /// bucket entry is already gone, is a no-op.
    pub async fn on_delete(&self, record: &Record) -> Result<(), StoreError> {
        let pending = self.keys.pending_expiry_key(record.id());

        if record.max_inactive_secs > 0 {
            if let Some(expiry_ms) = record.expiry_time_ms() {
                let bucket = self.keys.bucket_key(ceil_to_next_minute(expiry_ms));
                self.store.set_remove(&bucket, &pending).await?;
            }
        }
        self.store.delete(&pending).await?;
        Ok(())
    }

    /// Sweep the bucket for the minute containing the current wall-clock
    /// time. See [`Self::sweep_at`].
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        self.sweep_at(now_millis()).await
    }

    /// Sweep the bucket for the minute containing `now_ms`.
    ///
    /// Enumerates the bucket, deletes it, then touches every member so an
    /// engine with lazy expiry evicts the key (and emits any notification)
    /// now instead of at an arbitrary later point. Members referring to
    /// records that were deleted or refreshed into a later bucket are
    /// touched harmlessly. Running the same minute twice finds an empty
    /// bucket the second time and does nothing.
    ///
    /// Returns the number of members touched. Individual touch failures
    /// are logged and skipped; only enumeration or bucket deletion
    /// failures abort the sweep.
    pub async fn sweep_at(&self, now_ms: u64) -> Result<usize, StoreError> {
        let minute_ms = floor_to_minute(now_ms);
        let bucket = self.keys.bucket_key(minute_ms);

        let members = self.store.set_members(&bucket).await?;
        self.store.delete_collection(&bucket).await?;

        if members.is_empty() {
            trace!(minute_ms, "expiration bucket empty");
            return Ok(0);
        }

        debug!(
            minute_ms,
            members = members.len(),
            "sweeping expiration bucket"
        );

        stream::iter(members.iter())
            .for_each_concurrent(TOUCH_CONCURRENCY, |member| async move {
                if let Err(e) = self.store.exists(member).await {
                    warn!(key = ?member, error = %e, "touch failed, key left to backstop TTL");
                }
            })
            .await;

        Ok(members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .with_test_writer()
            .try_init();
    }

    fn policy() -> ExpirationPolicy<MemoryStore> {
        ExpirationPolicy::new(MemoryStore::new())
    }

    async fn bucket_members(
        policy: &ExpirationPolicy<MemoryStore>,
        minute_ms: u64,
    ) -> Vec<Bytes> {
        policy
            .store()
            .set_members(&policy.keys().bucket_key(minute_ms))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_indexes_into_ceiled_minute() {
        let policy = policy();
        let r1 = Record::new("r1", 0, 90); // expiry 90s -> bucket 120s

        policy.on_create_or_refresh(&r1, None).await.unwrap();

        let members = bucket_members(&policy, 120_000).await;
        assert_eq!(members, vec![policy.keys().pending_expiry_key("r1")]);

        // the pending key itself was written with its nominal TTL
        assert!(policy
            .store()
            .exists(&policy.keys().pending_expiry_key("r1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_refresh_moves_between_buckets() {
        init_tracing();
        let policy = policy();
        let mut r1 = Record::new("r1", 0, 90);

        policy.on_create_or_refresh(&r1, None).await.unwrap();
        let original_expiry = r1.expiry_time_ms();

        // refreshed at t=40s: expiry 130s -> bucket 180s
        r1.refresh(40_000);
        policy
            .on_create_or_refresh(&r1, original_expiry)
            .await
            .unwrap();

        assert!(bucket_members(&policy, 120_000).await.is_empty());
        assert_eq!(
            bucket_members(&policy, 180_000).await,
            vec![policy.keys().pending_expiry_key("r1")]
        );
    }

    #[tokio::test]
    async fn test_refresh_within_same_bucket_keeps_single_entry() {
        let policy = policy();
        let mut r1 = Record::new("r1", 0, 90); // bucket 120s

        policy.on_create_or_refresh(&r1, None).await.unwrap();
        let original_expiry = r1.expiry_time_ms();

        // 10s later the expiry is 100s, still rounding to the 120s bucket
        r1.refresh(10_000);
        policy
            .on_create_or_refresh(&r1, original_expiry)
            .await
            .unwrap();

        assert_eq!(bucket_members(&policy, 120_000).await.len(), 1);
        assert!(bucket_members(&policy, 180_000).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_bucket_invariant_across_many_refreshes() {
        let policy = policy();
        let mut r1 = Record::new("r1", 0, 90);
        let mut previous = None;

        for step in 0..8u64 {
            policy.on_create_or_refresh(&r1, previous).await.unwrap();
            previous = r1.expiry_time_ms();

            // the pending key must sit in exactly the ceiled bucket
            let expected = ceil_to_next_minute(r1.expiry_time_ms().unwrap());
            let mut holding = Vec::new();
            for minute in (60_000..=1_200_000).step_by(60_000) {
                if bucket_members(&policy, minute)
                    .await
                    .contains(&policy.keys().pending_expiry_key("r1"))
                {
                    holding.push(minute);
                }
            }
            assert_eq!(holding, vec![expected]);

            r1.refresh((step + 1) * 70_000);
        }
    }

    #[tokio::test]
    async fn test_sweep_touches_and_deletes_bucket() {
        init_tracing();
        let policy = policy();
        let r1 = Record::new("r1", 0, 90); // bucket 120s

        policy.on_create_or_refresh(&r1, None).await.unwrap();

        let touched = policy.sweep_at(125_000).await.unwrap();
        assert_eq!(touched, 1);
        assert!(bucket_members(&policy, 120_000).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let policy = policy();
        let r1 = Record::new("r1", 0, 90);

        policy.on_create_or_refresh(&r1, None).await.unwrap();

        assert_eq!(policy.sweep_at(125_000).await.unwrap(), 1);
        assert_eq!(policy.sweep_at(125_000).await.unwrap(), 0);
        assert!(bucket_members(&policy, 120_000).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_of_empty_minute_is_noop() {
        let policy = policy();
        assert_eq!(policy.sweep_at(1_000_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_tolerates_already_deleted_records() {
        let policy = policy();
        let r1 = Record::new("r1", 0, 90);

        policy.on_create_or_refresh(&r1, None).await.unwrap();
        // record deleted between indexing and sweep, bucket entry stale
        policy
            .store()
            .delete(&policy.keys().pending_expiry_key("r1"))
            .await
            .unwrap();

        // stale member is still "touched" without error
        assert_eq!(policy.sweep_at(125_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permanent_record_never_indexed() {
        let policy = policy();
        let r1 = Record::new("r1", 0, -1);

        policy.on_create_or_refresh(&r1, None).await.unwrap();

        for minute in (60_000..=600_000).step_by(60_000) {
            assert!(bucket_members(&policy, minute).await.is_empty());
        }
        assert_eq!(policy.sweep_at(125_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transition_to_permanent_clears_old_bucket() {
        let policy = policy();
        let mut r1 = Record::new("r1", 0, 90);

        policy.on_create_or_refresh(&r1, None).await.unwrap();
        let original_expiry = r1.expiry_time_ms();

        r1.max_inactive_secs = -1;
        policy
            .on_create_or_refresh(&r1, original_expiry)
            .await
            .unwrap();

        assert!(bucket_members(&policy, 120_000).await.is_empty());

        // the pending key from the sliding window must go too, or its old
        // nominal TTL would still fire an expiry event for a record that
        // no longer expires
        assert!(!policy
            .store()
            .exists(&policy.keys().pending_expiry_key("r1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_zero_interval_deletes_record() {
        let policy = policy();
        let live = policy.keys().record_key("r1");
        policy
            .store()
            .set_with_ttl(live.clone(), Bytes::from_static(b"payload"), 60)
            .await
            .unwrap();

        let r1 = Record::new("r1", 0, 0);
        policy.on_create_or_refresh(&r1, None).await.unwrap();

        assert!(!policy.store().exists(&live).await.unwrap());
        assert!(!policy
            .store()
            .exists(&policy.keys().pending_expiry_key("r1"))
            .await
            .unwrap());
        assert!(bucket_members(&policy, 60_000).await.is_empty());
    }

    #[tokio::test]
    async fn test_on_delete_removes_bucket_entry() {
        let policy = policy();
        let r1 = Record::new("r1", 0, 90);

        policy.on_create_or_refresh(&r1, None).await.unwrap();
        policy.on_delete(&r1).await.unwrap();

        assert!(bucket_members(&policy, 120_000).await.is_empty());
        assert!(!policy
            .store()
            .exists(&policy.keys().pending_expiry_key("r1"))
            .await
            .unwrap());

        // deleting again is a harmless no-op
        policy.on_delete(&r1).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_premature_loss_after_refresh() {
        // a record refreshed before its nominal expiry stays readable past
        // the original expiry instant
        let policy = ExpirationPolicy::with_config(
            MemoryStore::new(),
            PolicyConfig::default().with_safety_margin(Duration::from_secs(1)),
        );
        let live = policy.keys().record_key("r1");
        policy
            .store()
            .set_with_ttl(live.clone(), Bytes::from_static(b"payload"), 60)
            .await
            .unwrap();

        let mut r1 = Record::new("r1", now_millis(), 1);
        policy.on_create_or_refresh(&r1, None).await.unwrap();
        let original_expiry = r1.expiry_time_ms();

        tokio::time::sleep(Duration::from_millis(500)).await;
        r1.refresh(now_millis());
        policy
            .on_create_or_refresh(&r1, original_expiry)
            .await
            .unwrap();

        // past the original 1s expiry, inside the refreshed window
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(policy.store().exists(&live).await.unwrap());
    }

    #[tokio::test]
    async fn test_backstop_evicts_without_any_sweep() {
        // with no sweep at all, the live key is gone no later than
        // interval + safety margin after the last refresh
        let policy = ExpirationPolicy::with_config(
            MemoryStore::new(),
            PolicyConfig::default().with_safety_margin(Duration::from_secs(1)),
        );
        let live = policy.keys().record_key("r1");
        policy
            .store()
            .set_with_ttl(live.clone(), Bytes::from_static(b"payload"), 600)
            .await
            .unwrap();

        let r1 = Record::new("r1", now_millis(), 1);
        policy.on_create_or_refresh(&r1, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(!policy.store().exists(&live).await.unwrap());
        assert!(policy
            .store()
            .take_reclaimed()
            .contains(&live));
    }

    #[tokio::test]
    async fn test_worked_scenario_end_to_end() {
        // r1 created at t=0 with a 90s window: expiry 00:01:30, bucket
        // 00:02:00; refreshed at t=40s: expiry 00:02:10, bucket 00:03:00;
        // swept at t=03:05
        init_tracing();
        let policy = policy();
        let live = policy.keys().record_key("r1");
        policy
            .store()
            .set_with_ttl(live.clone(), Bytes::from_static(b"payload"), 600)
            .await
            .unwrap();

        let mut r1 = Record::new("r1", 0, 90);
        policy.on_create_or_refresh(&r1, None).await.unwrap();
        assert_eq!(bucket_members(&policy, 120_000).await.len(), 1);

        let original_expiry = r1.expiry_time_ms();
        r1.refresh(40_000);
        policy
            .on_create_or_refresh(&r1, original_expiry)
            .await
            .unwrap();
        assert!(bucket_members(&policy, 120_000).await.is_empty());
        assert_eq!(bucket_members(&policy, 180_000).await.len(), 1);

        // sweeping the old minute finds nothing to do
        assert_eq!(policy.sweep_at(125_000).await.unwrap(), 0);

        // sweeping at 00:03:05 touches the pending key and drops the bucket
        assert_eq!(policy.sweep_at(185_000).await.unwrap(), 1);
        assert!(bucket_members(&policy, 180_000).await.is_empty());
        assert_eq!(policy.sweep_at(185_000).await.unwrap(), 0);
    }

    /// Store double whose every operation fails, for error propagation.
    struct DownStore;

    #[async_trait]
    impl BackingStore for DownStore {
        async fn get(&self, _key: &Bytes) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::unavailable("get", "connection refused"))
        }
        async fn set_with_ttl(
            &self,
            _key: Bytes,
            _value: Bytes,
            _ttl_secs: u64,
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("set_with_ttl", "connection refused"))
        }
        async fn delete(&self, _key: &Bytes) -> Result<(), StoreError> {
            Err(StoreError::unavailable("delete", "connection refused"))
        }
        async fn exists(&self, _key: &Bytes) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("exists", "connection refused"))
        }
        async fn set_add(&self, _collection: &Bytes, _member: Bytes) -> Result<(), StoreError> {
            Err(StoreError::unavailable("set_add", "connection refused"))
        }
        async fn set_remove(
            &self,
            _collection: &Bytes,
            _member: &Bytes,
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("set_remove", "connection refused"))
        }
        async fn set_members(&self, _collection: &Bytes) -> Result<Vec<Bytes>, StoreError> {
            Err(StoreError::unavailable("set_members", "connection refused"))
        }
        async fn set_expire(&self, _key: &Bytes, _ttl_secs: u64) -> Result<(), StoreError> {
            Err(StoreError::unavailable("set_expire", "connection refused"))
        }
        async fn delete_collection(&self, _collection: &Bytes) -> Result<(), StoreError> {
            Err(StoreError::unavailable("delete_collection", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_mutation_errors_propagate() {
        let policy = ExpirationPolicy::new(DownStore);
        let r1 = Record::new("r1", 0, 90);

        let err = policy.on_create_or_refresh(&r1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));

        let err = policy.sweep_at(125_000).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
