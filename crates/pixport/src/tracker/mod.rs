//! Concurrent-safe status updates and the job-completion decision.

use std::sync::Arc;

use log::{debug, warn};

use crate::error::RegistryError;
use crate::finalizer::Finalizer;
use crate::job::WorkflowState;
use crate::registry::JobRegistry;

/// Outcome of processing one item, reported by a conversion/upload worker
/// or an operator-facing status endpoint.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// Converted and uploaded; `artifact` is where the object landed.
    Success { artifact: Option<String> },
    Failure { reason: String },
}

/// What a status report observed, after the lock was released.
#[derive(Debug, Clone, Copy)]
pub struct ReportAck {
    /// Whether the report matched an item in the job.
    pub matched: bool,
    /// Whether this report observed the job with no `Empty` items left.
    pub finished: bool,
}

pub struct CompletionTracker {
    registry: Arc<JobRegistry>,
    finalizer: Option<Arc<Finalizer>>,
    access_url_base: String,
}

impl CompletionTracker {
    pub fn new(
        registry: Arc<JobRegistry>,
        finalizer: Option<Arc<Finalizer>>,
        access_url_base: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            finalizer,
            access_url_base: access_url_base.into(),
        }
    }

    /// Applies one item outcome and decides, in the same locked scan,
    /// whether the job is finished.
    ///
    /// The mutation and the finish decision share a single pass over the
    /// item list so a concurrent report cannot slip between them. All side
    /// effects (logging, the finalizer hand-off) happen after the lock is
    /// released; a racing duplicate that also observes `finished` is
    /// absorbed by the finalizer's locked remove, which only one caller can
    /// win.
    ///
    /// `NotFound` is the expected answer for a report that arrives after
    /// its job was finalized; callers treat it as a no-op. A lock timeout
    /// is retryable.
    pub async fn report_item_outcome(
        &self,
        job_name: &str,
        item_id: &str,
        outcome: ItemOutcome,
    ) -> Result<ReportAck, RegistryError> {
        let access_url = format!("{}/{}", self.access_url_base, item_id);

        let (matched, finished) = self
            .registry
            .with_job_mut(job_name, |job| {
                let mut matched = false;
                let mut any_empty = false;

                for item in &mut job.items {
                    if item.id == item_id {
                        matched = true;
                        match &outcome {
                            ItemOutcome::Failure { .. } => {
                                item.state = WorkflowState::Failed;
                            }
                            ItemOutcome::Success { .. } => {
                                if item.has_file() {
                                    item.access_url = Some(access_url.clone());
                                }
                                item.state = WorkflowState::Succeeded;
                            }
                        }
                    }
                    if item.state == WorkflowState::Empty {
                        any_empty = true;
                    }
                }

                (matched, !any_empty)
            })
            .await?;

        match &outcome {
            ItemOutcome::Failure { reason } => {
                warn!("item '{}' of job '{}' failed: {}", item_id, job_name, reason);
            }
            ItemOutcome::Success { artifact } => {
                debug!(
                    "item '{}' of job '{}' succeeded (artifact: {:?})",
                    item_id, job_name, artifact
                );
            }
        }

        if !matched {
            // Possibly a stale or spoofed report; the rest of the job is
            // unaffected.
            warn!(
                "report for unknown item '{}' in job '{}' ignored",
                item_id, job_name
            );
        }

        if finished {
            if let Some(finalizer) = &self.finalizer {
                match finalizer.finalize(job_name).await {
                    Ok(receipt) => {
                        debug!(
                            "job '{}' handed off for finalization (receipt {})",
                            job_name, receipt.receipt_id
                        );
                    }
                    Err(RegistryError::NotFound(_)) => {
                        // A racing report finalized it first.
                        debug!("job '{}' already finalized", job_name);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(ReportAck { matched, finished })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::job::{Item, Job};

    const BASE: &str = "https://iiif.example/iiif";

    async fn tracked_job(items: Vec<Item>) -> (Arc<JobRegistry>, CompletionTracker) {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(5)));
        let mut job = Job::new("batch", false);
        job.items = items;
        registry.insert_new(job).await.unwrap();
        let tracker = CompletionTracker::new(Arc::clone(&registry), None, BASE);
        (registry, tracker)
    }

    fn item_with_file(id: &str, file: &str) -> Item {
        let mut item = Item::new(id);
        item.file_path = Some(file.to_string());
        item
    }

    #[tokio::test]
    async fn test_success_sets_state_and_access_url() {
        let (registry, tracker) =
            tracked_job(vec![item_with_file("ark-1", "a.tif"), Item::new("ark-2")]).await;

        let ack = tracker
            .report_item_outcome(
                "batch",
                "ark-1",
                ItemOutcome::Success {
                    artifact: Some("objects/ark-1.jp2".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(ack.matched);
        assert!(!ack.finished);

        let job = registry.snapshot("batch").await.unwrap();
        let item = job.item("ark-1").unwrap();
        assert_eq!(item.state, WorkflowState::Succeeded);
        assert_eq!(
            item.access_url.as_deref(),
            Some("https://iiif.example/iiif/ark-1")
        );
    }

    #[tokio::test]
    async fn test_failure_sets_failed_without_url() {
        let (registry, tracker) =
            tracked_job(vec![item_with_file("ark-1", "a.tif"), Item::new("ark-2")]).await;

        tracker
            .report_item_outcome(
                "batch",
                "ark-1",
                ItemOutcome::Failure {
                    reason: "converter exited 1".to_string(),
                },
            )
            .await
            .unwrap();

        let job = registry.snapshot("batch").await.unwrap();
        let item = job.item("ark-1").unwrap();
        assert_eq!(item.state, WorkflowState::Failed);
        assert!(item.access_url.is_none());
    }

    #[tokio::test]
    async fn test_last_report_observes_finished() {
        let (_registry, tracker) = tracked_job(vec![
            item_with_file("ark-1", "a.tif"),
            item_with_file("ark-2", "b.tif"),
        ])
        .await;

        let first = tracker
            .report_item_outcome("batch", "ark-1", ItemOutcome::Success { artifact: None })
            .await
            .unwrap();
        assert!(!first.finished);

        let second = tracker
            .report_item_outcome(
                "batch",
                "ark-2",
                ItemOutcome::Failure {
                    reason: "upload refused".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(second.finished);
    }

    #[tokio::test]
    async fn test_structural_items_never_block_completion() {
        let mut structural = Item::new("coll-1");
        structural.state = WorkflowState::Structural;

        let (_registry, tracker) =
            tracked_job(vec![structural, item_with_file("ark-1", "a.tif")]).await;

        let ack = tracker
            .report_item_outcome("batch", "ark-1", ItemOutcome::Success { artifact: None })
            .await
            .unwrap();
        assert!(ack.finished);
    }

    #[tokio::test]
    async fn test_unmatched_item_is_logged_not_fatal() {
        let (registry, tracker) = tracked_job(vec![item_with_file("ark-1", "a.tif")]).await;

        let ack = tracker
            .report_item_outcome("batch", "ghost", ItemOutcome::Success { artifact: None })
            .await
            .unwrap();

        assert!(!ack.matched);
        assert!(!ack.finished);

        let job = registry.snapshot("batch").await.unwrap();
        assert_eq!(job.item("ark-1").unwrap().state, WorkflowState::Empty);
    }

    #[tokio::test]
    async fn test_stale_report_for_absent_job_is_not_found() {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(5)));
        let tracker = CompletionTracker::new(Arc::clone(&registry), None, BASE);

        let err = tracker
            .report_item_outcome("gone", "ark-1", ItemOutcome::Success { artifact: None })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "gone"));

        // No observable side effect.
        assert!(registry.job_names().await.unwrap().is_empty());
    }
}
