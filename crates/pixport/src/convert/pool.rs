//! Dedicated thread pool for the blocking codec call.
//!
//! Conversion workers never share threads with request handling: work
//! arrives over a bounded queue, and a full queue answers the retry token
//! instead of blocking the sender.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::convert::Converter;
use crate::dispatch::{Destination, Envelope, Reply};
use crate::error::RegistryError;
use crate::storage::{object_key, ObjectStore};
use crate::tracker::{CompletionTracker, ItemOutcome};

/// One unit of conversion work.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub job_name: String,
    pub item_id: String,
    pub source: PathBuf,
}

/// What a worker reports back after attempting a request.
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    Converted {
        job_name: String,
        item_id: String,
        artifact: String,
    },
    Failed {
        job_name: String,
        item_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    /// The intake queue is full; resend later.
    Busy,
    /// The pool has shut down.
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConvertPoolConfig {
    pub worker_count: usize,
    /// Depth of the bounded intake queue; beyond it, submissions are Busy.
    pub queue_depth: usize,
    /// Where converted artifacts are written before upload.
    pub scratch_dir: PathBuf,
    /// Extension given to converted artifacts.
    pub artifact_extension: String,
}

impl Default for ConvertPoolConfig {
    fn default() -> Self {
        let worker_count = num_cpus::get().max(1);
        Self {
            worker_count,
            queue_depth: worker_count * 2,
            scratch_dir: std::env::temp_dir(),
            artifact_extension: "jp2".to_string(),
        }
    }
}

pub struct ConvertPool {
    work_sender: Sender<WorkRequest>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ConvertPool {
    /// Starts the pool. Outcomes are reported over `outcomes`; the async
    /// side pairs the receiver with [`pump_outcomes`].
    ///
    /// # Panics
    /// Panics if `config.worker_count` is 0.
    pub fn new(
        converter: Arc<dyn Converter>,
        store: Arc<dyn ObjectStore>,
        config: ConvertPoolConfig,
        outcomes: mpsc::Sender<WorkOutcome>,
    ) -> Self {
        assert!(config.worker_count > 0, "worker_count must be > 0");
        let (work_sender, work_receiver) = bounded::<WorkRequest>(config.queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let work_rx = work_receiver.clone();
            let outcome_tx = outcomes.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_converter = Arc::clone(&converter);
            let worker_store = Arc::clone(&store);
            let scratch_dir = config.scratch_dir.clone();
            let extension = config.artifact_extension.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    work_rx,
                    outcome_tx,
                    shutdown_flag,
                    worker_converter,
                    worker_store,
                    scratch_dir,
                    extension,
                );
            });
            workers.push(handle);
        }

        info!("started {} conversion workers", config.worker_count);

        Self {
            work_sender,
            workers,
            shutdown,
        }
    }

    /// Non-blocking submission. A full queue is `Busy`; the caller's
    /// dispatcher resends after its delay.
    pub fn try_submit(&self, request: WorkRequest) -> SubmitStatus {
        if self.shutdown.load(Ordering::Relaxed) {
            return SubmitStatus::Closed;
        }
        match self.work_sender.try_send(request) {
            Ok(()) => SubmitStatus::Accepted,
            Err(TrySendError::Full(_)) => SubmitStatus::Busy,
            Err(TrySendError::Disconnected(_)) => SubmitStatus::Closed,
        }
    }

    pub fn shutdown(&self) {
        info!("shutting down conversion pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn wait(self) {
        drop(self.work_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("conversion worker {} panicked: {:?}", i, e);
            } else {
                debug!("conversion worker {} finished", i);
            }
        }

        info!("all conversion workers have stopped");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker_id: usize,
    work_receiver: Receiver<WorkRequest>,
    outcomes: mpsc::Sender<WorkOutcome>,
    shutdown: Arc<AtomicBool>,
    converter: Arc<dyn Converter>,
    store: Arc<dyn ObjectStore>,
    scratch_dir: PathBuf,
    extension: String,
) {
    debug!("conversion worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("conversion worker {} received shutdown signal", worker_id);
            break;
        }

        match work_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => {
                debug!(
                    "worker {} converting item '{}' of job '{}'",
                    worker_id, request.item_id, request.job_name
                );
                let outcome = process_request(
                    request,
                    converter.as_ref(),
                    store.as_ref(),
                    &scratch_dir,
                    &extension,
                );
                if outcomes.blocking_send(outcome).is_err() {
                    error!("worker {} failed to report outcome", worker_id);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("conversion worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("conversion worker {} stopped", worker_id);
}

fn process_request(
    request: WorkRequest,
    converter: &dyn Converter,
    store: &dyn ObjectStore,
    scratch_dir: &std::path::Path,
    extension: &str,
) -> WorkOutcome {
    let key = object_key(&request.item_id, extension);
    let scratch_path = scratch_dir.join(format!("{}__{}", request.job_name, key));

    let result = converter
        .convert(&request.source, &scratch_path)
        .map_err(|e| e.to_string())
        .and_then(|()| store.put(&key, &scratch_path).map_err(|e| e.to_string()));
    let _ = std::fs::remove_file(&scratch_path);

    match result {
        Ok(stored) => WorkOutcome::Converted {
            job_name: request.job_name,
            item_id: request.item_id,
            artifact: stored.access_url,
        },
        Err(reason) => WorkOutcome::Failed {
            job_name: request.job_name,
            item_id: request.item_id,
            reason,
        },
    }
}

/// Bridges the typed dispatch destination onto the pool's bounded queue.
/// A closed pool drops the reply slot, which the dispatcher surfaces as a
/// transport failure rather than retrying.
pub fn spawn_intake(pool: Arc<ConvertPool>, capacity: usize) -> Destination<WorkRequest, ()> {
    let (tx, mut rx) = mpsc::channel::<Envelope<WorkRequest, ()>>(capacity);
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match pool.try_submit(envelope.body) {
                SubmitStatus::Accepted => {
                    let _ = envelope.reply_to.send(Reply::Done(()));
                }
                SubmitStatus::Busy => {
                    let _ = envelope.reply_to.send(Reply::Busy);
                }
                SubmitStatus::Closed => drop(envelope.reply_to),
            }
        }
    });
    tx
}

/// Feeds worker outcomes into the completion tracker. Stale outcomes for
/// already-finalized jobs are expected and ignored.
pub async fn pump_outcomes(
    mut outcomes: mpsc::Receiver<WorkOutcome>,
    tracker: Arc<CompletionTracker>,
) {
    while let Some(outcome) = outcomes.recv().await {
        let (job_name, item_id, item_outcome) = match outcome {
            WorkOutcome::Converted {
                job_name,
                item_id,
                artifact,
            } => (
                job_name,
                item_id,
                ItemOutcome::Success {
                    artifact: Some(artifact),
                },
            ),
            WorkOutcome::Failed {
                job_name,
                item_id,
                reason,
            } => (job_name, item_id, ItemOutcome::Failure { reason }),
        };

        match tracker
            .report_item_outcome(&job_name, &item_id, item_outcome)
            .await
        {
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => {
                debug!("stale outcome for job '{}' ignored", job_name);
            }
            Err(err) => {
                warn!("status update for job '{}' failed: {}", job_name, err);
            }
        }
    }
}
