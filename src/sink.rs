//! Record Sink
//!
//! Append-only CSV record streams, one per ingestion path, behind a single
//! writer thread:
//! - **Writer**: dedicated thread owning every open file, fed by an MPSC channel
//! - **Facades**: cloneable handles used by the ingestion paths
//!
//! # Components
//!
//! - [`SinkWriter`]: Enqueue normalized records for appending
//! - [`SinkAdmin`]: Shutdown command
//! - [`SinkBuilder`] / [`SinkHandles`]: Initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod facades;

pub use builder::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLOW_FILE, DEFAULT_POLL_FILE, DEFAULT_TRAP_FILE, SinkBuilder,
    SinkHandles, StreamPaths,
};
pub use error::SinkError;
pub use facades::{SinkAdmin, SinkWriter};
