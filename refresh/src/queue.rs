//! The manual refresh queue: a bounded FIFO of job ids over a map of job
//! records. Enqueue publishes the id; the processor consumes ids and drives
//! the job through its lifecycle with [`update`](ManualRefreshQueue::update).

use crate::error::Error;
use porthole_types::{JobState, ManualRefreshJob, unix_millis};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ManualRefreshQueue {
    jobs: Mutex<HashMap<String, ManualRefreshJob>>,
    tx: mpsc::Sender<String>,
    rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
}

impl ManualRefreshQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            jobs: Mutex::new(HashMap::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn generate_id(&self, jobs: &HashMap<String, ManualRefreshJob>) -> String {
        let mut nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        loop {
            let id = format!("job-{nanos}");
            if !jobs.contains_key(&id) {
                return id;
            }
            nanos += 1;
        }
    }

    /// Creates a queued job and publishes its id. When the queue is full the
    /// publish waits; cancelling `cancel` fails the enqueue and removes the
    /// record.
    pub async fn enqueue(
        &self,
        cancel: &CancellationToken,
        domain: &str,
        scope: &str,
        reason: &str,
    ) -> Result<ManualRefreshJob, Error> {
        if domain.trim().is_empty() {
            return Err(Error::EmptyDomain);
        }

        let job = {
            let mut jobs = self.jobs.lock().unwrap();
            let id = self.generate_id(&jobs);
            let job = ManualRefreshJob {
                job_id: id.clone(),
                domain: domain.to_string(),
                scope: (!scope.is_empty()).then(|| scope.to_string()),
                reason: (!reason.is_empty()).then(|| reason.to_string()),
                state: JobState::Queued,
                queued_at: unix_millis(),
                ..Default::default()
            };
            jobs.insert(id, job.clone());
            job
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                self.jobs.lock().unwrap().remove(&job.job_id);
                Err(Error::Cancelled)
            }
            sent = self.tx.send(job.job_id.clone()) => match sent {
                Ok(()) => Ok(job),
                Err(_) => {
                    self.jobs.lock().unwrap().remove(&job.job_id);
                    Err(Error::message("refresh queue closed"))
                }
            }
        }
    }

    /// Blocks until a job id is available or `cancel` fires. Ids whose job
    /// record has been deleted in the meantime are skipped.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<String> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                id = rx.recv() => match id {
                    Some(id) => {
                        if self.jobs.lock().unwrap().contains_key(&id) {
                            return Some(id);
                        }
                    }
                    None => return None,
                }
            }
        }
    }

    /// Upsert used by the processor as the job moves through its lifecycle.
    pub fn update(&self, job: ManualRefreshJob) {
        self.jobs.lock().unwrap().insert(job.job_id.clone(), job);
    }

    pub fn status(&self, id: &str) -> Option<ManualRefreshJob> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// Drops a job record; a queued id pointing at it will be skipped.
    pub fn delete(&self, id: &str) -> bool {
        self.jobs.lock().unwrap().remove(id).is_some()
    }

    /// All known jobs, newest first.
    pub fn jobs(&self) -> Vec<ManualRefreshJob> {
        let jobs = self.jobs.lock().unwrap();
        let mut all: Vec<ManualRefreshJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.job_id.cmp(&a.job_id)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_status_round_trips() {
        let queue = ManualRefreshQueue::new(8);
        let cancel = CancellationToken::new();

        let job = queue
            .enqueue(&cancel, "nodes", "namespace:all", "test")
            .await
            .unwrap();
        assert!(job.job_id.starts_with("job-"));
        assert_eq!(job.state, JobState::Queued);

        let fetched = queue.status(&job.job_id).unwrap();
        assert_eq!(fetched.job_id, job.job_id);
        assert_eq!(fetched.state, JobState::Queued);
        assert_eq!(fetched.domain, "nodes");
        assert_eq!(fetched.scope.as_deref(), Some("namespace:all"));
    }

    #[tokio::test]
    async fn empty_domain_is_rejected() {
        let queue = ManualRefreshQueue::new(8);
        let cancel = CancellationToken::new();
        let err = queue.enqueue(&cancel, "  ", "scope", "reason").await.unwrap_err();
        assert!(matches!(err, Error::EmptyDomain));
    }

    #[tokio::test]
    async fn next_returns_ids_in_fifo_order() {
        let queue = ManualRefreshQueue::new(8);
        let cancel = CancellationToken::new();

        let a = queue.enqueue(&cancel, "nodes", "a", "").await.unwrap();
        let b = queue.enqueue(&cancel, "nodes", "b", "").await.unwrap();

        assert_eq!(queue.next(&cancel).await, Some(a.job_id));
        assert_eq!(queue.next(&cancel).await, Some(b.job_id));
    }

    #[tokio::test]
    async fn next_skips_deleted_jobs() {
        let queue = ManualRefreshQueue::new(8);
        let cancel = CancellationToken::new();

        let a = queue.enqueue(&cancel, "nodes", "a", "").await.unwrap();
        let b = queue.enqueue(&cancel, "nodes", "b", "").await.unwrap();
        assert!(queue.delete(&a.job_id));

        assert_eq!(queue.next(&cancel).await, Some(b.job_id));
    }

    #[tokio::test]
    async fn cancelled_enqueue_fails_when_the_queue_is_full() {
        let queue = ManualRefreshQueue::new(1);
        let cancel = CancellationToken::new();

        queue.enqueue(&cancel, "nodes", "a", "").await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = queue
            .enqueue(&cancelled, "nodes", "b", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        // The failed job left no record behind.
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn next_unblocks_on_cancel() {
        let queue = ManualRefreshQueue::new(1);
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let queue = queue;
                queue.next(&cancel).await
            }
        });
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
