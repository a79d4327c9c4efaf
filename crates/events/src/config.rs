use std::str::FromStr;
use std::time::Duration;

use crate::error::BusError;

/// Tuning knobs for the poller, delivery queues, sweeper and shutdown.
///
/// Defaults favour near-real-time delivery against a relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Delay between poller ticks (default: 100 ms).
    pub poll_interval: Duration,
    /// Maximum messages read per tick (default: `100`).
    pub batch_size: usize,
    /// Bounded queue length per subscription (default: `100`).
    pub queue_capacity: usize,
    /// Delay between retention sweeps (default: 5 minutes).
    pub sweep_interval: Duration,
    /// Messages older than this are deleted by the sweeper (default: 24 hours).
    pub retention: Duration,
    /// Upper bound on waiting for background tasks during `close` (default: 5 s).
    pub shutdown_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 100,
            queue_capacity: 100,
            sweep_interval: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 3600),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl BusConfig {
    /// Load configuration from environment variables, falling back to
    /// [`BusConfig::default`] for anything unset or unparsable.
    ///
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `BUS_POLL_INTERVAL_MS`      | `100`   |
    /// | `BUS_BATCH_SIZE`            | `100`   |
    /// | `BUS_QUEUE_CAPACITY`        | `100`   |
    /// | `BUS_SWEEP_INTERVAL_SECS`   | `300`   |
    /// | `BUS_RETENTION_HOURS`       | `24`    |
    /// | `BUS_SHUTDOWN_TIMEOUT_SECS` | `5`     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            poll_interval: Duration::from_millis(env_or(
                "BUS_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            batch_size: env_or("BUS_BATCH_SIZE", defaults.batch_size),
            queue_capacity: env_or("BUS_QUEUE_CAPACITY", defaults.queue_capacity),
            sweep_interval: Duration::from_secs(env_or(
                "BUS_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            retention: Duration::from_secs(
                env_or::<u64>("BUS_RETENTION_HOURS", 24).saturating_mul(3600),
            ),
            shutdown_timeout: Duration::from_secs(env_or(
                "BUS_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }

    /// Reject values the background tasks cannot run with.
    ///
    /// A zero `retention` is allowed and expires every message on the next
    /// sweep.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.poll_interval.is_zero() {
            return Err(BusError::Config("poll_interval must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(BusError::Config("sweep_interval must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(BusError::Config("batch_size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(BusError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
