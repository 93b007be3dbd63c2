//! The process-wide store of in-flight jobs.
//!
//! The registry owns the job-status lock: every read-modify-decide sequence
//! goes through [`JobRegistry::with_job_mut`], never through raw map access,
//! so the finish decision is always linearizable with item updates.

use std::collections::HashMap;
use std::time::Duration;

use log::info;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use crate::error::RegistryError;
use crate::job::Job;

/// Name plus remaining-item count, for listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCount {
    pub name: String,
    pub remaining: usize,
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
    lock_timeout: Duration,
}

impl JobRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Bounded acquisition of the job-status lock. Timing out is a
    /// retryable failure, never a silent drop.
    async fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Job>>, RegistryError> {
        timeout(self.lock_timeout, self.jobs.lock())
            .await
            .map_err(|_| RegistryError::LockTimeout(self.lock_timeout))
    }

    /// Registers a new job. Rejects a duplicate submission while a job of
    /// the same name is still active.
    pub async fn insert_new(&self, job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.lock().await?;
        if jobs.contains_key(&job.name) {
            return Err(RegistryError::AlreadyRunning(job.name.clone()));
        }
        info!("job '{}' registered with {} items", job.name, job.items.len());
        jobs.insert(job.name.clone(), job);
        Ok(())
    }

    /// Runs `f` against the named job under the job-status lock. This is
    /// the only mutating surface; callers receive whatever `f` decides
    /// while the lock is held.
    pub async fn with_job_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, RegistryError> {
        let mut jobs = self.lock().await?;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(f(job))
    }

    /// Atomically removes and returns the named job.
    pub async fn remove(&self, name: &str) -> Result<Job, RegistryError> {
        let mut jobs = self.lock().await?;
        jobs.remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn job_names(&self) -> Result<Vec<String>, RegistryError> {
        let jobs = self.lock().await?;
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    /// Names with remaining-item counts for dashboards. The snapshot may be
    /// slightly stale by the time the caller reads it; that weak-consistency
    /// read path is accepted.
    pub async fn counts(&self) -> Result<Vec<JobCount>, RegistryError> {
        let jobs = self.lock().await?;
        let mut counts: Vec<JobCount> = jobs
            .values()
            .map(|job| JobCount {
                name: job.name.clone(),
                remaining: job.remaining(),
            })
            .collect();
        counts.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(counts)
    }

    /// Clones the named job for reporting.
    pub async fn snapshot(&self, name: &str) -> Result<Job, RegistryError> {
        let jobs = self.lock().await?;
        jobs.get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Administrative removal of a stuck job: sample the remaining count,
    /// wait `settle`, resample, and delete only if the count did not move.
    /// Returns `true` if the job was deleted, `false` if it made progress
    /// and was left alone.
    pub async fn delete_stalled(
        &self,
        name: &str,
        settle: Duration,
    ) -> Result<bool, RegistryError> {
        let before = self.with_job_mut(name, |job| job.remaining()).await?;
        tokio::time::sleep(settle).await;
        let after = self.with_job_mut(name, |job| job.remaining()).await?;

        if before == after {
            self.remove(name).await?;
            info!("deleted stalled job '{}' ({} items remaining)", name, after);
            Ok(true)
        } else {
            info!(
                "job '{}' progressed ({} -> {} remaining), not deleting",
                name, before, after
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Item, WorkflowState};

    fn job_with_empty_items(name: &str, count: usize) -> Job {
        let mut job = Job::new(name, false);
        for n in 0..count {
            job.items.push(Item::new(format!("ark-{}", n)));
        }
        job
    }

    fn registry() -> JobRegistry {
        JobRegistry::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let registry = registry();
        registry
            .insert_new(job_with_empty_items("batch", 3))
            .await
            .unwrap();

        let snapshot = registry.snapshot("batch").await.unwrap();
        assert_eq!(snapshot.items.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let registry = registry();
        registry
            .insert_new(job_with_empty_items("batch", 1))
            .await
            .unwrap();

        let err = registry
            .insert_new(job_with_empty_items("batch", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(name) if name == "batch"));
    }

    #[tokio::test]
    async fn test_with_job_mut_not_found() {
        let registry = registry();
        let err = registry
            .with_job_mut("absent", |_| ())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "absent"));
    }

    #[tokio::test]
    async fn test_remove_is_once_only() {
        let registry = registry();
        registry
            .insert_new(job_with_empty_items("batch", 1))
            .await
            .unwrap();

        assert!(registry.remove("batch").await.is_ok());
        let err = registry.remove("batch").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_counts_report_remaining() {
        let registry = registry();
        let mut job = job_with_empty_items("batch", 3);
        job.items[0].state = WorkflowState::Succeeded;
        registry.insert_new(job).await.unwrap();

        let counts = registry.counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].remaining, 2);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_reported() {
        let registry = JobRegistry::new(Duration::from_millis(20));
        let guard = registry.jobs.lock().await;

        let err = registry.job_names().await.unwrap_err();
        assert!(matches!(err, RegistryError::LockTimeout(_)));
        drop(guard);

        assert!(registry.job_names().await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_stalled_removes_unmoving_job() {
        let registry = registry();
        registry
            .insert_new(job_with_empty_items("batch", 2))
            .await
            .unwrap();

        let deleted = registry
            .delete_stalled("batch", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(deleted);
        assert!(matches!(
            registry.snapshot("batch").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_stalled_spares_progressing_job() {
        let registry = std::sync::Arc::new(registry());
        registry
            .insert_new(job_with_empty_items("batch", 2))
            .await
            .unwrap();

        let background = std::sync::Arc::clone(&registry);
        let updater = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background
                .with_job_mut("batch", |job| {
                    job.items[0].state = WorkflowState::Succeeded;
                })
                .await
                .unwrap();
        });

        let deleted = registry
            .delete_stalled("batch", Duration::from_millis(80))
            .await
            .unwrap();
        updater.await.unwrap();

        assert!(!deleted);
        assert!(registry.snapshot("batch").await.is_ok());
    }
}
