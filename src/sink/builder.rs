//! Sink builder and handles.
//!
//! Provides a builder pattern for constructing the record sink
//! and a handles struct for accessing the sink facades.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crate::record::RecordType;
use crate::sink::actor::SinkActor;
use crate::sink::{SinkAdmin, SinkError, SinkWriter};

/// Default channel capacity for writer commands.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default flow record file name.
pub const DEFAULT_FLOW_FILE: &str = "netflow_flows.csv";

/// Default poll record file name.
pub const DEFAULT_POLL_FILE: &str = "snmp_poll.csv";

/// Default trap record file name.
pub const DEFAULT_TRAP_FILE: &str = "snmp_traps.csv";

/// Output file of each record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    pub flow: PathBuf,
    pub poll: PathBuf,
    pub trap: PathBuf,
}

impl StreamPaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            flow: dir.join(DEFAULT_FLOW_FILE),
            poll: dir.join(DEFAULT_POLL_FILE),
            trap: dir.join(DEFAULT_TRAP_FILE),
        }
    }

    /// File receiving records of `record_type`.
    pub fn path(&self, record_type: RecordType) -> &Path {
        match record_type {
            RecordType::Flow => &self.flow,
            RecordType::SnmpPoll => &self.poll,
            RecordType::SnmpTrap => &self.trap,
        }
    }
}

/// Builder for constructing the record sink.
pub struct SinkBuilder {
    paths: StreamPaths,
    channel_capacity: usize,
}

impl SinkBuilder {
    /// Create a builder writing the default file names into `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            paths: StreamPaths::in_dir(dir),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Use explicit stream paths.
    pub fn paths(mut self, paths: StreamPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Open the streams, spawn the writer and return handles.
    pub fn build(self) -> Result<SinkHandles, SinkError> {
        let (actor_handle, tx) = SinkActor::spawn(&self.paths, self.channel_capacity)?;

        Ok(SinkHandles {
            writer: SinkWriter::new(tx.clone()),
            admin: SinkAdmin::new(tx),
            paths: self.paths,
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to the sink facades.
pub struct SinkHandles {
    /// Record writer shared by the ingestion paths.
    pub writer: SinkWriter,
    /// Shutdown facade.
    pub admin: SinkAdmin,
    /// Where each stream is written.
    pub paths: StreamPaths,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SinkHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandles")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl SinkHandles {
    /// Gracefully shutdown the sink.
    ///
    /// Sends shutdown to the writer actor, which writes any queued records,
    /// flushes every stream and closes the files.
    pub fn shutdown(mut self) -> Result<(), SinkError> {
        self.admin.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| SinkError::Internal("Failed to join sink thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for SinkHandles {
    fn drop(&mut self) {
        if self.actor_handle.is_some() {
            let _ = self.admin.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NormalizedRecord;
    use chrono::Local;
    use tempfile::tempdir;

    #[test]
    fn test_default_paths() {
        let paths = StreamPaths::in_dir("/var/lib/sonar");
        assert_eq!(paths.flow, PathBuf::from("/var/lib/sonar/netflow_flows.csv"));
        assert_eq!(
            paths.path(RecordType::SnmpPoll),
            Path::new("/var/lib/sonar/snmp_poll.csv")
        );
        assert_eq!(
            paths.path(RecordType::SnmpTrap),
            Path::new("/var/lib/sonar/snmp_traps.csv")
        );
    }

    #[test]
    fn test_sink_roundtrip() {
        let dir = tempdir().unwrap();
        let handles = SinkBuilder::new(dir.path().join("out"))
            .channel_capacity(16)
            .build()
            .unwrap();

        let writer = handles.writer.clone();
        for i in 0..5 {
            writer
                .append(NormalizedRecord::new(
                    Local::now(),
                    format!("VM{i}"),
                    RecordType::SnmpPoll,
                    "load1",
                    Some(f64::from(i)),
                ))
                .unwrap();
        }
        assert_eq!(writer.appended(), 5);

        let poll_path = handles.paths.poll.clone();
        handles.shutdown().unwrap();

        let mut reader = csv::Reader::from_path(&poll_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["timestamp", "source", "record_type", "metric", "value", "label", "message"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 5);
        for (i, row) in rows.iter().enumerate() {
            assert!(!row[0].is_empty());
            assert_eq!(&row[1], format!("VM{i}"));
            assert_eq!(&row[2], "SNMP_POLL");
            assert_eq!(&row[3], "load1");
            assert_eq!(&row[4], format!("{i}.0"));
        }
    }

    #[test]
    fn test_message_with_delimiters_is_quoted() {
        let dir = tempdir().unwrap();
        let handles = SinkBuilder::new(dir.path()).build().unwrap();
        handles
            .writer
            .append(
                NormalizedRecord::new(Local::now(), "r1", RecordType::Flow, "flow", Some(1.0))
                    .with_message("Flow 1/1, Ver:9, Src:10.0.0.1:80 -> 10.0.0.2:443"),
            )
            .unwrap();
        let flow_path = handles.paths.flow.clone();
        handles.shutdown().unwrap();

        let mut reader = csv::Reader::from_path(&flow_path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[6], "Flow 1/1, Ver:9, Src:10.0.0.1:80 -> 10.0.0.2:443");
    }

    #[test]
    fn test_writer_fails_after_shutdown() {
        let dir = tempdir().unwrap();
        let handles = SinkBuilder::new(dir.path()).build().unwrap();
        let writer = handles.writer.clone();
        handles.shutdown().unwrap();

        let result = writer.append(NormalizedRecord::new(
            Local::now(),
            "VM1",
            RecordType::SnmpPoll,
            "load1",
            None,
        ));
        assert!(matches!(result, Err(SinkError::ChannelSend)));
    }
}
