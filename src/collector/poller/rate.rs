//! Previous counter observations used for rate computation.

use std::collections::HashMap;
use std::time::Duration;

use strum_macros::{AsRefStr, Display};

/// Interface byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Counter {
    Rx,
    Tx,
}

/// Last observed value per (device, counter).
///
/// Owned by one poller; nothing else reads or writes it.
#[derive(Debug, Default)]
pub struct RateState {
    previous: HashMap<(String, Counter), u64>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current` and return the per-second rate since the previous
    /// observation over the poll `interval`.
    ///
    /// The first observation of a counter yields 0. A counter that went
    /// backwards (agent restart, wrap) also yields 0 and restarts from the
    /// new value.
    pub fn observe(
        &mut self,
        device: &str,
        counter: Counter,
        current: u64,
        interval: Duration,
    ) -> f64 {
        let previous = self
            .previous
            .insert((device.to_string(), counter), current)
            .unwrap_or(current);

        if interval.is_zero() {
            return 0.0;
        }
        current.saturating_sub(previous) as f64 / interval.as_secs_f64()
    }

    pub fn previous(&self, device: &str, counter: Counter) -> Option<u64> {
        self.previous.get(&(device.to_string(), counter)).copied()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}
