//! Drives image tasks, either as tracked background jobs or inline with a
//! hard ceiling.

use super::models::{JobRecord, JobUpdate};
use super::store::JobStore;
use crate::images::{Image, ImageJobError, ImageService, ImageTask};
use crate::server::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SyncImageError {
    #[error("Image request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Failed(#[from] ImageJobError),

    #[error("Image task aborted: {0}")]
    Aborted(String),
}

pub struct JobRunner {
    store: Arc<JobStore>,
    images: Arc<ImageService>,
    sync_timeout: Duration,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        images: Arc<ImageService>,
        sync_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            images,
            sync_timeout,
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// Creates a Pending job for `task` and starts working on it in the
    /// background. Returns the Pending record without waiting.
    ///
    /// The spawned task is the only writer of the job. Client disconnects do
    /// not stop it; only process shutdown does.
    pub fn submit(&self, owner: &str, task: ImageTask) -> JobRecord {
        let kind = task.kind();
        let job = self.store.create(owner, kind, task.payload());
        metrics::record_job_created(kind.as_str());
        metrics::set_job_store_size(self.store.len());

        let store = self.store.clone();
        let images = self.images.clone();
        let cancel = self.shutdown.child_token();
        let id = job.id.clone();
        let owner = owner.to_string();
        tokio::spawn(async move {
            drive(&store, &images, &id, &owner, task, &cancel).await;
        });

        job
    }

    /// Runs `task` inline, giving up after the configured ceiling.
    ///
    /// On expiry the outbound call is cancelled so that it releases its
    /// upstream resources, and the caller gets [`SyncImageError::Timeout`].
    /// The call is also cancelled if the caller stops waiting first.
    pub async fn run_with_timeout(&self, owner: &str, task: ImageTask) -> Result<Image, SyncImageError> {
        let kind = task.kind();
        let cancel = self.shutdown.child_token();
        let guard = cancel.clone().drop_guard();

        let images = self.images.clone();
        let call_cancel = cancel.clone();
        let owner = owner.to_string();
        let mut handle =
            tokio::spawn(async move { images.execute(&owner, &task, &call_cancel).await });

        let outcome = match tokio::time::timeout(self.sync_timeout, &mut handle).await {
            Ok(Ok(result)) => result.map_err(SyncImageError::from),
            Ok(Err(join_error)) => {
                error!("Inline {} task panicked: {}", kind, join_error);
                Err(SyncImageError::Aborted(join_error.to_string()))
            }
            Err(_) => {
                warn!(
                    "Inline {} task exceeded {}s, cancelling",
                    kind,
                    self.sync_timeout.as_secs()
                );
                metrics::record_sync_timeout(kind.as_str());
                Err(SyncImageError::Timeout(self.sync_timeout))
            }
        };

        // Fires the token on timeout; after a normal finish it is a no-op.
        drop(guard);
        outcome
    }
}

const SHUTDOWN_REASON: &str = "Job cancelled: server is shutting down";

async fn drive(
    store: &JobStore,
    images: &ImageService,
    id: &str,
    owner: &str,
    task: ImageTask,
    cancel: &CancellationToken,
) {
    let kind = task.kind();
    let started = Instant::now();

    if let Err(e) = store.transition(id, JobUpdate::Processing) {
        warn!("Job {} could not start: {}", id, e);
        return;
    }

    let update = match images.execute(owner, &task, cancel).await {
        Ok(image) => {
            info!("Job {} completed with image {}", id, image.url);
            JobUpdate::Completed(image)
        }
        Err(e) if e.is_cancelled() => {
            info!("Job {} interrupted by shutdown", id);
            JobUpdate::Failed(SHUTDOWN_REASON.to_string())
        }
        Err(e) => {
            warn!("Job {} failed: {}", id, e);
            JobUpdate::Failed(e.to_string())
        }
    };

    let status = update.target_status();
    match store.transition(id, update) {
        Ok(_) => metrics::record_job_finished(kind.as_str(), status.as_str(), started.elapsed()),
        // The sweeper may have evicted a job that ran past the retention horizon.
        Err(e) => warn!("Could not record outcome of job {}: {}", id, e),
    }
}
