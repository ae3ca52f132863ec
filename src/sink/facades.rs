//! User-facing sink facades.
//!
//! - `SinkWriter`: Enqueue records for the writer actor
//! - `SinkAdmin`: Shutdown

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use crate::record::NormalizedRecord;
use crate::sink::SinkError;
use crate::sink::actor::Command;

/// Cloneable record writer shared by all ingestion paths.
///
/// Uses a blocking `send`: when the queue is full the caller waits for the
/// actor instead of losing records.
#[derive(Clone)]
pub struct SinkWriter {
    tx: SyncSender<Command>,
    appended: Arc<AtomicU64>,
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("appended", &self.appended())
            .finish_non_exhaustive()
    }
}

impl SinkWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self {
            tx,
            appended: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of records accepted by this writer and its clones.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Enqueue a record for appending to its stream.
    pub fn append(&self, record: NormalizedRecord) -> Result<(), SinkError> {
        self.tx
            .send(Command::Append(Box::new(record)))
            .map_err(|_| SinkError::ChannelSend)?;
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueue every record, stopping at the first failure.
    pub fn append_all(
        &self,
        records: impl IntoIterator<Item = NormalizedRecord>,
    ) -> Result<(), SinkError> {
        records.into_iter().try_for_each(|r| self.append(r))
    }
}

/// Sink administration.
pub struct SinkAdmin {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for SinkAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkAdmin").finish_non_exhaustive()
    }
}

impl SinkAdmin {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    pub fn shutdown(&self) -> Result<(), SinkError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| SinkError::ChannelSend)
    }
}
