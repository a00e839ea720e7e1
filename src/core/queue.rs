use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use uuid::Uuid;

use crate::constants::{JOB_ATTEMPTS, JOB_BACKOFF, JOB_TIMEOUT};
use crate::core::domain::{ExecutionJob, ExecutionResult, Language};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Total deliveries per job, the first one included.
    pub attempts: u32,
    /// Delay before the first retry; doubled for each one after.
    pub backoff: Duration,
    /// Per-attempt limit enforced by the worker, independent of the
    /// sandbox's own time limit.
    pub job_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            attempts: JOB_ATTEMPTS,
            backoff: JOB_BACKOFF,
            job_timeout: JOB_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("job {id} failed after {attempts} attempts: {reason}")]
    Failed {
        id: Uuid,
        attempts: u32,
        reason: String,
    },
    #[error("job {id} was dropped before completion")]
    Dropped { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Failed,
}

type Completion = Result<ExecutionResult, QueueError>;

#[derive(Debug)]
struct JobEntry {
    job: ExecutionJob,
    state: JobState,
    attempts_made: u32,
    last_error: Option<String>,
    waiter: Option<oneshot::Sender<Completion>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: u64,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    pub id: Uuid,
    pub language: Language,
    pub attempts: u32,
    pub reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: ExecutionJob,
    pub attempt: u32,
}

/// Caller's side of an enqueued job.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    rx: oneshot::Receiver<Completion>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> Result<ExecutionResult, QueueError> {
        match self.rx.await {
            Ok(completion) => completion,
            Err(_) => Err(QueueError::Dropped { id: self.id }),
        }
    }
}

/// In-memory job broker. Ready job ids flow through a channel shared by all
/// workers; a job's entry lives in `jobs` until it completes, and is kept
/// there after its last failed attempt for inspection.
#[derive(Clone, Debug)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    options: QueueOptions,
    jobs: DashMap<Uuid, JobEntry>,
    ready_tx: Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
    ready_rx: AsyncMutex<mpsc::UnboundedReceiver<Uuid>>,
    completed: AtomicU64,
}

impl JobQueue {
    pub fn new(options: QueueOptions) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                options,
                jobs: DashMap::new(),
                ready_tx: Mutex::new(Some(ready_tx)),
                ready_rx: AsyncMutex::new(ready_rx),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn enqueue(&self, job: ExecutionJob) -> Result<JobHandle, QueueError> {
        let id = job.id;
        let (tx, rx) = oneshot::channel();
        self.inner.jobs.insert(
            id,
            JobEntry {
                job,
                state: JobState::Waiting,
                attempts_made: 0,
                last_error: None,
                waiter: Some(tx),
            },
        );

        if let Err(e) = self.push_ready(id) {
            self.inner.jobs.remove(&id);
            return Err(e);
        }
        tracing::debug!("Job enqueued");
        Ok(JobHandle { id, rx })
    }

    /// Waits for the next ready job and marks it active. Returns `None` once
    /// the queue is closed and drained.
    pub async fn claim(&self) -> Option<ClaimedJob> {
        loop {
            let id = {
                let mut ready = self.inner.ready_rx.lock().await;
                ready.recv().await?
            };

            let Some(mut entry) = self.inner.jobs.get_mut(&id) else {
                continue;
            };
            if entry.state != JobState::Waiting {
                tracing::warn!("Skipping job {} in state {:?}", id, entry.state);
                continue;
            }
            entry.state = JobState::Active;
            entry.attempts_made += 1;
            return Some(ClaimedJob {
                job: entry.job.clone(),
                attempt: entry.attempts_made,
            });
        }
    }

    pub fn complete(&self, id: Uuid, result: ExecutionResult) {
        let Some((_, mut entry)) = self.inner.jobs.remove(&id) else {
            tracing::warn!("Completed unknown job {}", id);
            return;
        };
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(waiter) = entry.waiter.take() {
            if waiter.send(Ok(result)).is_err() {
                tracing::debug!("Nobody is waiting for job {}", id);
            }
        }
    }

    /// Records a failed attempt: schedules a retry with exponential backoff
    /// while attempts remain, otherwise fails the job for good.
    pub fn fail(&self, id: Uuid, reason: String) {
        let Some(mut entry) = self.inner.jobs.get_mut(&id) else {
            tracing::warn!("Failed unknown job {}", id);
            return;
        };
        entry.last_error = Some(reason.clone());

        if entry.attempts_made >= self.inner.options.attempts {
            drop(entry);
            self.give_up(id, reason);
            return;
        }

        entry.state = JobState::Delayed;
        let delay = self
            .inner
            .options
            .backoff
            .saturating_mul(2u32.saturating_pow(entry.attempts_made.saturating_sub(1)));
        let attempt = entry.attempts_made;
        drop(entry);

        tracing::warn!(
            "Job {} attempt {} failed: {}; retrying in {:?}",
            id,
            attempt,
            reason,
            delay
        );
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.retry(id);
        });
    }

    fn retry(&self, id: Uuid) {
        match self.inner.jobs.get_mut(&id) {
            Some(mut entry) if entry.state == JobState::Delayed => entry.state = JobState::Waiting,
            _ => return,
        }
        if self.push_ready(id).is_err() {
            self.give_up(id, QueueError::Closed.to_string());
        }
    }

    fn give_up(&self, id: Uuid, reason: String) {
        let Some(mut entry) = self.inner.jobs.get_mut(&id) else {
            return;
        };
        entry.state = JobState::Failed;
        let attempts = entry.attempts_made;
        let waiter = entry.waiter.take();
        drop(entry);

        tracing::error!("Job {} failed after {} attempts: {}", id, attempts, reason);
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(QueueError::Failed {
                id,
                attempts,
                reason,
            }));
        }
    }

    fn push_ready(&self, id: Uuid) -> Result<(), QueueError> {
        let ready_tx = self
            .inner
            .ready_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match ready_tx.as_ref() {
            Some(tx) => tx.send(id).map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    /// Stops accepting jobs. Workers finish what is already ready, then
    /// `claim` returns `None`.
    pub fn close(&self) {
        self.inner
            .ready_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .ready_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts {
            completed: self.inner.completed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.inner.jobs.iter() {
            match entry.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    #[cfg(test)]
    pub fn state(&self, id: Uuid) -> Option<JobState> {
        self.inner.jobs.get(&id).map(|entry| entry.state)
    }

    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.inner
            .jobs
            .iter()
            .filter(|entry| entry.state == JobState::Failed)
            .map(|entry| FailedJob {
                id: entry.job.id,
                language: entry.job.language,
                attempts: entry.attempts_made,
                reason: entry.last_error.clone(),
                created_at: entry.job.created_at,
            })
            .collect()
    }
}
