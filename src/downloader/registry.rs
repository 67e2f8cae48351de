// JobRegistry - in-memory job store with TTL eviction
//
// Pipelines write into it, HTTP handlers read from it. Every write goes
// through `update`, which enforces forward-only status transitions, so a
// job that reached Completed or Failed never changes again.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::models::{Artifact, Job, JobSnapshot, JobStatus};

/// Typed partial update applied to one job
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// Enter (or stay in) Processing with a new stage label
    Processing { stage: String },
    Completed(Artifact),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("job not found")]
    NotFound,
    #[error("job is not completed")]
    NotCompleted,
    #[error("artifact already claimed")]
    AlreadyClaimed,
}

pub struct JobRegistry {
    jobs: DashMap<String, Job>,
    ttl: time::Duration,
}

impl JobRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            ttl: time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX),
        }
    }

    /// Register a fresh Pending job and return its id
    pub fn create_job(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs
            .insert(id.clone(), Job::new(id.clone(), OffsetDateTime::now_utc()));
        tracing::debug!("[Registry] Created job {}", id);
        id
    }

    /// Apply an update. Unknown ids and updates to terminal jobs are ignored;
    /// returns whether the update was applied.
    pub fn update(&self, id: &str, update: JobUpdate) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return false;
        };

        let next = match &update {
            JobUpdate::Processing { .. } => JobStatus::Processing,
            JobUpdate::Completed(_) => JobStatus::Completed,
            JobUpdate::Failed(_) => JobStatus::Failed,
        };
        if !job.status.can_become(next) {
            return false;
        }

        match update {
            JobUpdate::Processing { stage } => {
                job.status = JobStatus::Processing;
                job.stage = stage;
            }
            JobUpdate::Completed(artifact) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.stage = "Completed".to_string();
                job.result = Some(artifact);
            }
            JobUpdate::Failed(message) => {
                job.status = JobStatus::Failed;
                job.stage = "Failed".to_string();
                job.error = Some(message);
            }
        }
        true
    }

    /// Write `value` only if it is strictly greater than the stored progress
    pub fn advance_progress(&self, id: &str, value: u8, stage: Option<&str>) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }

        let value = value.min(100);
        if value <= job.progress {
            return false;
        }
        job.progress = value;
        if let Some(stage) = stage {
            job.stage = stage.to_string();
        }
        true
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|job| job.clone())
    }

    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.get(id).map(|job| JobSnapshot::from(&*job))
    }

    /// Hand out the artifact exactly once
    pub fn claim_artifact(&self, id: &str) -> Result<Artifact, ClaimError> {
        let mut job = self.jobs.get_mut(id).ok_or(ClaimError::NotFound)?;
        if job.status != JobStatus::Completed {
            return Err(ClaimError::NotCompleted);
        }
        if job.artifact_claimed {
            return Err(ClaimError::AlreadyClaimed);
        }

        let artifact = job.result.clone().ok_or(ClaimError::NotCompleted)?;
        job.artifact_claimed = true;
        Ok(artifact)
    }

    /// Remove every job older than the TTL, whatever its status
    pub fn sweep(&self, now: OffsetDateTime) -> Vec<Job> {
        let mut evicted = Vec::new();
        self.jobs.retain(|_, job| {
            if now - job.created_at > self.ttl {
                evicted.push(job.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Periodic sweep; also deletes artifacts nobody came back for
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let evicted = registry.sweep(OffsetDateTime::now_utc());
                if evicted.is_empty() {
                    continue;
                }

                tracing::info!("[Registry] Evicted {} expired job(s)", evicted.len());
                for path in orphaned_artifacts(&evicted) {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => tracing::debug!("[Registry] Removed orphaned artifact {}", path.display()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => tracing::warn!("[Registry] Failed to remove {}: {}", path.display(), e),
                    }
                }
            }
        })
    }
}

/// Artifacts of completed jobs that were never streamed
fn orphaned_artifacts(evicted: &[Job]) -> Vec<PathBuf> {
    evicted
        .iter()
        .filter(|job| job.status == JobStatus::Completed && !job.artifact_claimed)
        .filter_map(|job| job.result.as_ref().map(|a| a.file_path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            file_path: PathBuf::from(format!("/tmp/{}", name)),
            suggested_filename: name.to_string(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = registry.create_job();

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.result.is_none() && job.error.is_none());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_unknown_id_update_is_noop() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        assert!(!registry.update("missing", JobUpdate::Failed("x".into())));
        assert!(!registry.advance_progress("missing", 50, None));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = registry.create_job();

        assert!(registry.advance_progress(&id, 40, Some("Downloading")));
        assert!(!registry.advance_progress(&id, 30, Some("Stale")));
        assert!(!registry.advance_progress(&id, 40, None));

        let job = registry.get(&id).unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(job.stage, "Downloading");
    }

    #[test]
    fn test_terminal_state_is_final() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = registry.create_job();

        registry.update(&id, JobUpdate::Processing { stage: "Working".into() });
        assert!(registry.update(&id, JobUpdate::Failed("boom".into())));
        assert!(!registry.update(&id, JobUpdate::Completed(artifact("a.mp4"))));
        assert!(!registry.update(&id, JobUpdate::Processing { stage: "again".into() }));
        assert!(!registry.advance_progress(&id, 99, None));

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_completed_sets_result_and_full_progress() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = registry.create_job();

        registry.update(&id, JobUpdate::Completed(artifact("a.mp4")));
        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        assert_eq!(job.result, Some(artifact("a.mp4")));
    }

    #[test]
    fn test_artifact_claim_is_single_use() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let id = registry.create_job();

        assert_eq!(registry.claim_artifact(&id), Err(ClaimError::NotCompleted));
        registry.update(&id, JobUpdate::Completed(artifact("a.mp4")));

        assert_eq!(registry.claim_artifact(&id), Ok(artifact("a.mp4")));
        assert_eq!(registry.claim_artifact(&id), Err(ClaimError::AlreadyClaimed));
        assert_eq!(registry.claim_artifact("missing"), Err(ClaimError::NotFound));
    }

    #[test]
    fn test_sweep_evicts_by_age_regardless_of_status() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let running = registry.create_job();
        registry.update(&running, JobUpdate::Processing { stage: "Working".into() });
        let done = registry.create_job();
        registry.update(&done, JobUpdate::Completed(artifact("done.mp4")));

        let now = OffsetDateTime::now_utc();
        assert!(registry.sweep(now).is_empty());

        let evicted = registry.sweep(now + time::Duration::seconds(61));
        assert_eq!(evicted.len(), 2);
        assert!(registry.get(&running).is_none());

        // late writes from a pipeline are silent no-ops
        assert!(!registry.update(&running, JobUpdate::Completed(artifact("late.mp4"))));
        assert!(registry.is_empty());

        assert_eq!(orphaned_artifacts(&evicted), vec![PathBuf::from("/tmp/done.mp4")]);
    }

    #[tokio::test]
    async fn test_sweeper_removes_orphaned_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.mp4");
        std::fs::write(&path, b"data").unwrap();

        let registry = Arc::new(JobRegistry::new(Duration::ZERO));
        let id = registry.create_job();
        registry.update(
            &id,
            JobUpdate::Completed(Artifact {
                file_path: path.clone(),
                suggested_filename: "orphan.mp4".into(),
            }),
        );

        let handle = registry.spawn_sweeper(Duration::from_millis(20));
        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert!(registry.get(&id).is_none());
        assert!(!path.exists());
    }
}
