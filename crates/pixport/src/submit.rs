//! Submission: place an ingested job in the registry and dispatch its work.

use log::{info, warn};

use crate::convert::WorkRequest;
use crate::dispatch::{Destination, Dispatcher};
use crate::error::PixportError;
use crate::job::WorkflowState;
use crate::manifest::{IngestOutcome, RowWarning};
use crate::registry::JobRegistry;

#[derive(Debug)]
pub struct SubmitOutcome {
    pub job_name: String,
    /// Items eligible for conversion work.
    pub eligible: usize,
    /// Work messages successfully handed to the conversion intake.
    pub dispatched: usize,
    /// Row-level ingestion warnings, passed through for the submitter.
    pub warnings: Vec<RowWarning>,
}

/// Registers the ingested job and dispatches one work message per eligible
/// item through the retry dispatcher.
///
/// Duplicate submission is rejected before any work is dispatched. A
/// transport failure on an individual work message marks that item failed
/// rather than leaving it stuck in the initial state.
pub async fn submit(
    registry: &JobRegistry,
    dispatcher: &Dispatcher,
    work_intake: &Destination<WorkRequest, ()>,
    outcome: IngestOutcome,
) -> Result<SubmitOutcome, PixportError> {
    let IngestOutcome { job, warnings } = outcome;
    let job_name = job.name.clone();

    let work: Vec<WorkRequest> = job
        .items
        .iter()
        .filter(|item| item.state == WorkflowState::Empty && item.has_file())
        .filter_map(|item| {
            item.source_path().map(|source| WorkRequest {
                job_name: job_name.clone(),
                item_id: item.id.clone(),
                source: source.to_path_buf(),
            })
        })
        .collect();
    let eligible = work.len();

    registry.insert_new(job).await.map_err(PixportError::from)?;

    let mut dispatched = 0;
    for request in work {
        let item_id = request.item_id.clone();
        match dispatcher.send("conversion-intake", work_intake, request).await {
            Ok(()) => dispatched += 1,
            Err(err) => {
                warn!(
                    "work message for item '{}' of job '{}' failed: {}",
                    item_id, job_name, err
                );
                let _ = registry
                    .with_job_mut(&job_name, |job| {
                        if let Some(item) = job.items.iter_mut().find(|i| i.id == item_id) {
                            item.state = WorkflowState::Failed;
                        }
                    })
                    .await;
            }
        }
    }

    info!(
        "job '{}' submitted: {} of {} eligible items dispatched",
        job_name, dispatched, eligible
    );

    Ok(SubmitOutcome {
        job_name,
        eligible,
        dispatched,
        warnings,
    })
}
