//! Reconciliation Sweeper
//!
//! Background task that drives the expiration policy's sweep on a fixed
//! period. Losing the task is safe: backstop TTLs still reclaim every key
//! and bucket, only eviction timeliness degrades until it restarts.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::keys::{now_millis, MINUTE_MS};
use crate::store::BackingStore;

use super::ExpirationPolicy;

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between ticks
    pub period: Duration,

    /// Upper bound on one minute's sweep, so a slow store cannot stall
    /// subsequent ticks
    pub sweep_timeout: Duration,

    /// How many earlier minutes to re-sweep each tick besides the current
    /// one. Sweeps are idempotent, so re-checks are free and absorb
    /// scheduler jitter.
    pub lookback_minutes: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            sweep_timeout: Duration::from_secs(30),
            lookback_minutes: 1,
        }
    }
}

impl SweeperConfig {
    /// Set the tick period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the per-minute sweep timeout
    pub fn with_sweep_timeout(mut self, sweep_timeout: Duration) -> Self {
        self.sweep_timeout = sweep_timeout;
        self
    }

    /// Set the lookback window
    pub fn with_lookback_minutes(mut self, lookback_minutes: u64) -> Self {
        self.lookback_minutes = lookback_minutes;
        self
    }
}

/// Background reconciliation task
pub struct Sweeper<S> {
    policy: Arc<ExpirationPolicy<S>>,
    config: SweeperConfig,
}

impl<S: BackingStore + 'static> Sweeper<S> {
    /// Create a new sweeper over a shared policy
    pub fn new(policy: Arc<ExpirationPolicy<S>>, config: SweeperConfig) -> Self {
        Self { policy, config }
    }

    /// Run the sweeper (should be spawned as a task)
    pub async fn run(self) {
        let mut ticker = interval(self.config.period);
        info!(
            period = ?self.config.period,
            lookback = self.config.lookback_minutes,
            "reconciliation sweeper started"
        );

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One tick: sweep the current minute and the lookback window. Errors
    /// and timeouts are logged and isolated per minute; the next tick
    /// proceeds regardless.
    pub(crate) async fn tick(&self) {
        let now_ms = now_millis();
        for back in 0..=self.config.lookback_minutes {
            let at_ms = now_ms.saturating_sub(back * MINUTE_MS);
            match timeout(self.config.sweep_timeout, self.policy.sweep_at(at_ms)).await {
                Ok(Ok(touched)) => {
                    if touched > 0 {
                        debug!(touched, "swept expiration bucket");
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "sweep failed, bucket left to backstop TTL");
                }
                Err(_) => {
                    warn!(
                        sweep_timeout = ?self.config.sweep_timeout,
                        "sweep timed out, continuing with next tick"
                    );
                }
            }
        }
    }

    /// Spawn the sweeper as a background task
    pub fn spawn(
        policy: Arc<ExpirationPolicy<S>>,
        config: SweeperConfig,
    ) -> tokio::task::JoinHandle<()> {
        let sweeper = Self::new(policy, config);
        tokio::spawn(sweeper.run())
    }
}
