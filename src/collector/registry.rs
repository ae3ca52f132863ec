//! Collector registry for managing ingestion unit lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::collector::Collector;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a running unit.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// Collector name.
    pub name: String,
    /// Ingestion path.
    pub category: String,
    /// Schedule description.
    pub schedule: String,
}

struct Job {
    info: JobInfo,
    handle: JoinHandle<()>,
}

/// Registry for the long-lived ingestion tasks.
///
/// Every unit is spawned on the Tokio runtime with a receiver of one shared
/// shutdown watch channel.
pub struct CollectorRegistry {
    shutdown_tx: watch::Sender<bool>,
    jobs: RwLock<HashMap<uuid::Uuid, Job>>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register and spawn a collector.
    pub async fn spawn<C: Collector>(&self, mut collector: C) -> uuid::Uuid {
        let id = uuid::Uuid::new_v4();
        let name = collector.name().to_string();
        let info = JobInfo {
            id,
            name: name.clone(),
            category: collector.category().to_string(),
            schedule: collector.schedule().to_string(),
        };

        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!(collector = %name, "Collector started");
            match collector.run(shutdown).await {
                Ok(()) => tracing::info!(collector = %name, "Collector stopped"),
                Err(e) => tracing::error!(collector = %name, error = %e, "Collector failed"),
            }
        });

        tracing::info!(
            collector = %info.name,
            category = %info.category,
            schedule = %info.schedule,
            job_id = %id,
            "Collector registered"
        );
        self.jobs.write().await.insert(id, Job { info, handle });
        id
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .read()
            .await
            .values()
            .map(|j| j.info.clone())
            .collect()
    }

    /// Gracefully shutdown all units with default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Signal shutdown and wait for every unit, aborting stragglers after `timeout`.
    pub async fn shutdown_with_timeout(self, timeout: Duration) {
        let jobs: Vec<Job> = self.jobs.into_inner().into_values().collect();
        let job_count = jobs.len();
        let aborts: Vec<_> = jobs.iter().map(|j| j.handle.abort_handle()).collect();

        let _ = self.shutdown_tx.send(true);

        let joined = tokio::time::timeout(timeout, async {
            for job in jobs {
                if let Err(e) = job.handle.await
                    && e.is_panic()
                {
                    tracing::error!(collector = %job.info.name, "Collector panicked");
                }
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(job_count, timeout = ?timeout, "Collector shutdown timed out, aborting");
            for abort in aborts {
                abort.abort();
            }
        } else {
            tracing::info!(job_count, "Collector shutdown complete");
        }
    }
}
