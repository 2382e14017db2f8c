//! Fixed-size worker pool in front of the crawl sessions
//!
//! Jobs go through one bounded FIFO queue. `max_workers` tasks share the
//! receiving end, so at most that many sessions run at once across all
//! sources and a saturated queue is reported instead of growing.

use crate::crawler::session::{run_session, SessionContext};
use crate::state::{ClaimMode, SessionTicket};
use crate::HarvestError;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Work item for the pool
#[derive(Debug)]
pub enum Job {
    /// Cron trigger; the source is claimed by the worker right before dispatch
    Scheduled { source_id: String },
    /// Operator start or resume, already claimed by the caller
    Claimed { ticket: SessionTicket },
}

pub(crate) struct WorkerPool {
    sender: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks on the current runtime
    pub(crate) fn spawn(workers: usize, capacity: usize, ctx: Arc<SessionContext>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { worker_loop(worker_id, receiver, ctx).await })
            })
            .collect();

        Self { sender, handles }
    }

    /// Enqueues a job without waiting
    ///
    /// Hands the job back when the queue is full or the pool is gone, so a
    /// claimed ticket can be rolled back.
    pub(crate) fn try_submit(&self, job: Job) -> Result<(), Job> {
        self.sender.try_send(job).map_err(|e| e.into_inner())
    }

    /// Jobs waiting for a worker
    pub(crate) fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: Arc<SessionContext>,
) {
    loop {
        // The lock is only held while waiting for the next job
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            tracing::debug!("Worker {} exiting, queue closed", worker_id);
            break;
        };

        match job {
            Job::Claimed { ticket } => run_session(&ctx, ticket).await,
            Job::Scheduled { source_id } => {
                let cell = ctx.cells.get_or_create(&source_id);
                match cell.claim(ClaimMode::Scheduled) {
                    Ok(ticket) => run_session(&ctx, ticket).await,
                    Err(HarvestError::AlreadyRunning { .. }) => {
                        tracing::debug!(source_id = %source_id, "Skipping scheduled run, already running");
                    }
                    Err(e) => {
                        tracing::info!(source_id = %source_id, "Skipping scheduled run: {}", e);
                    }
                }
            }
        }
    }
}
