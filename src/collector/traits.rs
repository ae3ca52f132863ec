//! Core collector traits and types.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::sink::SinkError;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that stop an ingestion unit.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// The record sink is gone.
    #[error("failed to send record: {0}")]
    Sink(#[from] SinkError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

/// How an ingestion unit is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Waits on a socket and handles traffic as it arrives.
    Continuous,

    /// Runs one cycle per fixed interval.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
        }
    }
}

/// Long-lived ingestion unit.
///
/// Each unit owns its socket or timer and pushes records to the sink through
/// a writer it holds. Units run in their own Tokio task until the shutdown
/// watch flips to `true`.
///
/// # Error Handling
///
/// - **Per-item failures** (malformed packet, device timeout, unknown template)
///   are logged or turned into diagnostic records. `run()` keeps going.
/// - **Unit failures** (socket error, sink closed) end the unit and are
///   returned as `Err(CollectorError)`.
#[async_trait::async_trait]
pub trait Collector: Send + 'static {
    /// Unique identifier for this unit.
    fn name(&self) -> &str;

    /// Ingestion path (`flow`, `poll`, `trap`).
    fn category(&self) -> &str;

    fn schedule(&self) -> Schedule;

    /// Run until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// Work already in progress when shutdown is signalled (a poll cycle,
    /// a received packet) is finished before returning.
    async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), CollectorError>;
}
