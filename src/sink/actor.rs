//! Writer actor owning the record streams.
//!
//! Single-writer pattern: one thread owns every open CSV file and processes
//! commands via MPSC, so records from concurrent ingestion paths never
//! interleave. Every appended record is flushed before the next command.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::record::{COLUMNS, NormalizedRecord, RecordType};
use crate::sink::SinkError;
use crate::sink::builder::StreamPaths;

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Append one record to the stream of its record type.
    Append(Box<NormalizedRecord>),
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Streams
// =============================================================================

/// One open append-only record stream.
struct Stream {
    writer: csv::Writer<File>,
    written: u64,
}

impl Stream {
    /// Open `path` for appending, writing the header row only into an empty file.
    fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(COLUMNS)?;
            writer.flush()?;
        }

        Ok(Self { writer, written: 0 })
    }

    fn append(&mut self, record: &NormalizedRecord) -> Result<(), SinkError> {
        self.writer.write_record(record.to_row())?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Record writer actor.
pub struct SinkActor {
    streams: HashMap<RecordType, Stream>,
    rx: Receiver<Command>,
}

impl SinkActor {
    /// Open every stream and spawn the writer thread.
    ///
    /// Files are opened before the thread starts so that an unwritable output
    /// location is reported to the caller instead of being logged later.
    pub fn spawn(
        paths: &StreamPaths,
        channel_capacity: usize,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>), SinkError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);

        let mut streams = HashMap::new();
        for record_type in [RecordType::Flow, RecordType::SnmpPoll, RecordType::SnmpTrap] {
            let path = paths.path(record_type);
            streams.insert(record_type, Stream::open(path)?);
            tracing::debug!(stream = %record_type, path = %path.display(), "Record stream opened");
        }

        let mut actor = SinkActor { streams, rx };
        let handle = thread::Builder::new()
            .name("sonar-sink".to_string())
            .spawn(move || actor.run())?;

        Ok((handle, tx))
    }

    fn run(&mut self) {
        tracing::info!("SinkActor started");

        loop {
            match self.rx.recv() {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(_) => {
                    tracing::warn!("Channel disconnected, shutting down");
                    self.flush_all();
                    break;
                }
            }
        }

        for (record_type, stream) in &self.streams {
            tracing::info!(stream = %record_type, written = stream.written, "Record stream closed");
        }
        tracing::info!("SinkActor stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Append(record) => {
                if let Err(e) = self.append(&record) {
                    tracing::error!(
                        error = %e,
                        stream = %record.record_type,
                        source = %record.source,
                        metric = %record.metric,
                        "Record append failed"
                    );
                }
            }
            Command::Shutdown => {
                tracing::info!("SinkActor shutting down");
                self.drain();
                self.flush_all();
                return true;
            }
        }
        false
    }

    fn append(&mut self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let stream = self
            .streams
            .get_mut(&record.record_type)
            .ok_or_else(|| SinkError::Internal(format!("no stream for {}", record.record_type)))?;
        stream.append(record)
    }

    /// Write records that were queued before the shutdown command.
    fn drain(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            if let Command::Append(record) = cmd
                && let Err(e) = self.append(&record)
            {
                tracing::error!(error = %e, "Record append failed during drain");
            }
        }
    }

    fn flush_all(&mut self) {
        for (record_type, stream) in self.streams.iter_mut() {
            if let Err(e) = stream.writer.flush() {
                tracing::error!(error = %e, stream = %record_type, "Stream flush failed");
            }
        }
    }
}
