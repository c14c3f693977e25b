//! BUCKETSWEEP - Time-Bucketed Expiration Reconciler
//!
//! Guarantees prompt, observable removal of sliding-TTL records held in a
//! key-value engine whose native expiry delivery cannot be trusted alone.
//! Expiration is dual: every live key carries a backstop TTL (nominal
//! expiry plus a safety margin) while a minute-bucket index, swept on a
//! fixed period, touches due keys to force the engine's lazy expiry at a
//! deterministic time.

pub mod error;
pub mod keys;
pub mod policy;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use keys::KeySpace;
pub use policy::{ExpirationPolicy, PolicyConfig, Sweeper, SweeperConfig};
pub use record::Record;
pub use store::{BackingStore, MemoryStore};
