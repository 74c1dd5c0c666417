//! In-process work queue for document processing.
//!
//! Jobs carry an explicit attempt counter. Retries are re-enqueued after
//! `retry_delay(attempt)`; once the counter reaches the configured
//! maximum the job moves to the dead-letter list instead. With a zero
//! backoff cap the re-enqueue is synchronous, which keeps retry flows
//! fully deterministic under test.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use docvault_core::backoff::retry_delay;
use docvault_core::models::ProcessingJob;

pub struct JobQueue {
    tx: mpsc::UnboundedSender<ProcessingJob>,
    rx: Mutex<mpsc::UnboundedReceiver<ProcessingJob>>,
    dead_letters: Mutex<Vec<ProcessingJob>>,
    max_attempts: u32,
    backoff_cap_secs: u64,
}

impl JobQueue {
    pub fn new(max_attempts: u32, backoff_cap_secs: u64) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            dead_letters: Mutex::new(Vec::new()),
            max_attempts,
            backoff_cap_secs,
        })
    }

    pub fn push(&self, job: ProcessingJob) {
        // Send only fails when the receiver is gone, i.e. at shutdown.
        let _ = self.tx.send(job);
    }

    /// Wait for the next job.
    pub async fn pop(&self) -> Option<ProcessingJob> {
        self.rx.lock().await.recv().await
    }

    /// Take the next job without waiting.
    pub async fn try_pop(&self) -> Option<ProcessingJob> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Re-enqueue a failed job with its attempt counter bumped. Returns
    /// `false` when the job has exhausted its attempts and was
    /// dead-lettered instead.
    pub async fn retry(self: &Arc<Self>, job: ProcessingJob) -> bool {
        let next_attempt = job.attempt + 1;
        if next_attempt >= self.max_attempts {
            tracing::warn!(
                document_id = %job.document_id,
                attempts = next_attempt,
                "job exhausted retries, dead-lettering"
            );
            self.dead_letters.lock().await.push(job);
            return false;
        }

        let retried = ProcessingJob {
            attempt: next_attempt,
            ..job
        };
        let delay = retry_delay(next_attempt, self.backoff_cap_secs);
        if delay.is_zero() {
            self.push(retried);
        } else {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.push(retried);
            });
        }
        true
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().await.len()
    }
}
