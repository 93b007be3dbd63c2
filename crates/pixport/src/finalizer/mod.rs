//! One-time job teardown: drain the finished job from the registry and
//! notify its requester.

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::{Destination, Dispatcher};
use crate::error::RegistryError;
use crate::registry::JobRegistry;

/// Message sent to the notifier destination when a job with a registered
/// requester completes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    pub job_name: String,
    pub requester: String,
    /// Items converted and uploaded in this run.
    pub processed: usize,
    /// Base under which per-item access URLs were published.
    pub access_url_base: String,
    pub finished_at: DateTime<Utc>,
}

/// Message sent to the operator error destination when downstream
/// notification fails.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAlert {
    pub job_name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FinalizeReceipt {
    pub receipt_id: String,
    pub job_name: String,
    pub processed: usize,
    /// Whether a completion notice was delivered.
    pub notified: bool,
}

pub struct Finalizer {
    registry: std::sync::Arc<JobRegistry>,
    dispatcher: Dispatcher,
    notices: Destination<CompletionNotice, ()>,
    alerts: Destination<OperatorAlert, ()>,
    access_url_base: String,
}

impl Finalizer {
    pub fn new(
        registry: std::sync::Arc<JobRegistry>,
        dispatcher: Dispatcher,
        notices: Destination<CompletionNotice, ()>,
        alerts: Destination<OperatorAlert, ()>,
        access_url_base: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            notices,
            alerts,
            access_url_base: access_url_base.into(),
        }
    }

    /// Atomically removes the job and notifies its requester, if any.
    ///
    /// The locked remove is the double-finalization guard: a second caller
    /// gets [`RegistryError::NotFound`] and treats it as a no-op. A
    /// notification failure is diverted to the operator error destination
    /// and never blocks removal of the job record itself.
    pub async fn finalize(&self, job_name: &str) -> Result<FinalizeReceipt, RegistryError> {
        let job = self.registry.remove(job_name).await?;
        let processed = job.processed();
        info!(
            "job '{}' finalized: {} of {} items processed",
            job_name,
            processed,
            job.items.len()
        );

        let mut notified = false;
        if let Some(requester) = &job.requester {
            let notice = CompletionNotice {
                job_name: job.name.clone(),
                requester: requester.clone(),
                processed,
                access_url_base: self.access_url_base.clone(),
                finished_at: Utc::now(),
            };

            match self
                .dispatcher
                .send("completion-notices", &self.notices, notice)
                .await
            {
                Ok(()) => notified = true,
                Err(err) => {
                    error!(
                        "completion notice for job '{}' failed: {}",
                        job_name, err
                    );
                    let alert = OperatorAlert {
                        job_name: job.name.clone(),
                        message: format!("completion notice undeliverable: {}", err),
                    };
                    if let Err(alert_err) = self
                        .dispatcher
                        .send("operator-alerts", &self.alerts, alert)
                        .await
                    {
                        error!(
                            "operator alert for job '{}' also failed: {}",
                            job_name, alert_err
                        );
                    }
                }
            }
        }

        Ok(FinalizeReceipt {
            receipt_id: Uuid::new_v4().to_string(),
            job_name: job.name,
            processed,
            notified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::dispatch::{Envelope, Reply};
    use crate::job::{Item, Job, WorkflowState};

    struct Fixture {
        registry: Arc<JobRegistry>,
        finalizer: Finalizer,
        notices: mpsc::Receiver<Envelope<CompletionNotice, ()>>,
        alerts: mpsc::Receiver<Envelope<OperatorAlert, ()>>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(5)));
        let (notice_tx, notices) = mpsc::channel(8);
        let (alert_tx, alerts) = mpsc::channel(8);
        let finalizer = Finalizer::new(
            Arc::clone(&registry),
            Dispatcher::new(Duration::from_millis(5)),
            notice_tx,
            alert_tx,
            "https://iiif.example/iiif",
        );
        Fixture {
            registry,
            finalizer,
            notices,
            alerts,
        }
    }

    fn finished_job(name: &str, requester: Option<&str>) -> Job {
        let mut job = Job::new(name, false);
        job.requester = requester.map(str::to_string);
        for n in 0..3 {
            let mut item = Item::new(format!("ark-{}", n));
            item.state = WorkflowState::Succeeded;
            job.items.push(item);
        }
        job
    }

    /// Replies `Done(())` to every envelope on `rx` and returns the bodies.
    fn ack_all<T: Send + 'static>(
        mut rx: mpsc::Receiver<Envelope<T, ()>>,
    ) -> tokio::task::JoinHandle<Vec<T>> {
        tokio::spawn(async move {
            let mut bodies = Vec::new();
            while let Some(envelope) = rx.recv().await {
                let _ = envelope.reply_to.send(Reply::Done(()));
                bodies.push(envelope.body);
            }
            bodies
        })
    }

    #[tokio::test]
    async fn test_finalize_removes_job_and_notifies_requester() {
        let fixture = fixture();
        fixture
            .registry
            .insert_new(finished_job("batch", Some("curator")))
            .await
            .unwrap();

        let notice_server = ack_all(fixture.notices);

        let receipt = fixture.finalizer.finalize("batch").await.unwrap();
        assert_eq!(receipt.processed, 3);
        assert!(receipt.notified);
        assert!(matches!(
            fixture.registry.snapshot("batch").await,
            Err(RegistryError::NotFound(_))
        ));

        drop(fixture.finalizer);
        let notices = notice_server.await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].requester, "curator");
        assert_eq!(notices[0].processed, 3);
    }

    #[tokio::test]
    async fn test_second_finalize_is_not_found() {
        let fixture = fixture();
        fixture
            .registry
            .insert_new(finished_job("batch", None))
            .await
            .unwrap();

        assert!(fixture.finalizer.finalize("batch").await.is_ok());
        let err = fixture.finalizer.finalize("batch").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_no_requester_means_no_notice() {
        let mut fixture = fixture();
        fixture
            .registry
            .insert_new(finished_job("batch", None))
            .await
            .unwrap();

        let receipt = fixture.finalizer.finalize("batch").await.unwrap();
        assert!(!receipt.notified);
        assert!(fixture.notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notifier_failure_alerts_operator_without_failing() {
        let fixture = fixture();
        fixture
            .registry
            .insert_new(finished_job("batch", Some("curator")))
            .await
            .unwrap();

        // Notifier destination is gone; operator alerts still answered.
        drop(fixture.notices);
        let alert_server = ack_all(fixture.alerts);

        let receipt = fixture.finalizer.finalize("batch").await.unwrap();
        assert!(!receipt.notified);
        assert!(matches!(
            fixture.registry.snapshot("batch").await,
            Err(RegistryError::NotFound(_))
        ));

        drop(fixture.finalizer);
        let alerts = alert_server.await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("undeliverable"));
    }
}
