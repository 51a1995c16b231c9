//! # Job Runner
//!
//! In-process, at-least-once job queue with a fixed worker pool. Submitted jobs
//! go through a bounded tokio channel; each worker pulls a job id, moves the
//! job to `Running` and hands its payload to the [`JobHandler`]. Transient
//! failures are rescheduled after the [`RetryPolicy`] delay, exhausted jobs are
//! parked in the [`DeadLetterQueue`] and announced as `JobDeadLettered`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use super::retry::RetryPolicy;
use super::state::{determine_target_state, JobEvent, JobState};
use crate::config::JobsConfig;
use crate::error::{NavetteError, Result};
use crate::events::{DomainEvent, EventPublisher, JobDeadLetteredPayload};
use crate::logging::log_job_operation;

pub type JobId = Uuid;

/// What a handler made of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Nothing left to act on; never retried
    Skipped(String),
}

/// Work executed by the runner's workers
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Payload: Serialize + Clone + std::fmt::Debug + Send + Sync + 'static;

    fn queue_name(&self) -> &'static str;

    /// Run one attempt (1-based). Errors whose `is_retryable()` is true are
    /// retried, everything else fails the job.
    async fn handle(&self, payload: &Self::Payload, attempt: u32) -> Result<JobOutcome>;
}

/// Externally visible state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct JobRecord<P> {
    payload: P,
    state: JobState,
    attempts: u32,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl<P> JobRecord<P> {
    fn status(&self, job_id: JobId) -> JobStatus {
        JobStatus {
            job_id,
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub retry_policy: RetryPolicy,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// How long succeeded, skipped and failed jobs stay visible to `job_status`
    pub finished_retention: Duration,
}

impl From<&JobsConfig> for RunnerOptions {
    fn from(config: &JobsConfig) -> Self {
        Self {
            retry_policy: config.retry_policy(),
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            finished_retention: config.finished_retention(),
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

struct RunnerShared<H: JobHandler> {
    handler: Arc<H>,
    policy: RetryPolicy,
    jobs: DashMap<JobId, JobRecord<H::Payload>>,
    dead_letters: DeadLetterQueue,
    events: EventPublisher,
    sender: mpsc::Sender<JobId>,
    accepting: AtomicBool,
    finished_retention: Duration,
}

pub struct JobRunner<H: JobHandler> {
    shared: Arc<RunnerShared<H>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<H: JobHandler> std::fmt::Debug for JobRunner<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("queue", &self.shared.handler.queue_name())
            .field("jobs", &self.shared.jobs.len())
            .field("dead_letters", &self.shared.dead_letters.len())
            .finish()
    }
}

impl<H: JobHandler> JobRunner<H> {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(handler: H, options: RunnerOptions, events: EventPublisher) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));

        let shared = Arc::new(RunnerShared {
            handler: Arc::new(handler),
            policy: options.retry_policy,
            jobs: DashMap::new(),
            dead_letters: DeadLetterQueue::new(),
            events,
            sender,
            accepting: AtomicBool::new(true),
            finished_retention: options.finished_retention,
        });

        let workers = (0..options.worker_count)
            .map(|worker_index| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    shared.worker_loop(worker_index, receiver, shutdown_rx).await;
                })
            })
            .collect();

        info!(
            queue = shared.handler.queue_name(),
            worker_count = options.worker_count,
            queue_capacity = options.queue_capacity,
            max_attempts = shared.policy.max_attempts,
            "Job runner started"
        );

        Self {
            shared,
            workers: parking_lot::Mutex::new(workers),
            shutdown_tx,
        }
    }

    /// Queue a job. Fails with [`NavetteError::Queue`] once the runner is shut
    /// down or the queue is full.
    pub fn submit(&self, payload: H::Payload) -> Result<JobId> {
        let queue = self.shared.handler.queue_name();
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(NavetteError::Queue(format!("{queue} runner is shut down")));
        }

        self.shared.evict_finished();

        let job_id = Uuid::new_v4();
        self.shared.jobs.insert(
            job_id,
            JobRecord {
                payload,
                state: JobState::Queued,
                attempts: 0,
                last_error: None,
                updated_at: Utc::now(),
            },
        );

        if let Err(error) = self.shared.sender.try_send(job_id) {
            self.shared.jobs.remove(&job_id);
            let reason = match error {
                mpsc::error::TrySendError::Full(_) => "queue is full",
                mpsc::error::TrySendError::Closed(_) => "queue is closed",
            };
            return Err(NavetteError::Queue(format!("{queue}: {reason}")));
        }

        log_job_operation("submit", &job_id.to_string(), queue, 0, "queued", None);
        Ok(job_id)
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.shared
            .jobs
            .get(&job_id)
            .map(|record| record.status(job_id))
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared.dead_letters.list()
    }

    /// Resubmit a dead-lettered job with a fresh attempt budget
    pub fn requeue_dead_letter(&self, job_id: JobId) -> Result<()> {
        let queue = self.shared.handler.queue_name();
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(NavetteError::Queue(format!("{queue} runner is shut down")));
        }

        let entry = self.shared.dead_letters.take(job_id).ok_or_else(|| {
            NavetteError::Queue(format!("job {job_id} is not in the dead letter queue"))
        })?;

        if self.shared.apply(job_id, &JobEvent::Requeue).is_none() {
            self.shared.dead_letters.push(entry);
            return Err(NavetteError::Queue(format!("job {job_id} cannot be requeued")));
        }
        if let Some(mut record) = self.shared.jobs.get_mut(&job_id) {
            record.attempts = 0;
        }

        if let Err(error) = self.shared.sender.try_send(job_id) {
            // Put it back where the operator found it
            if let Some(mut record) = self.shared.jobs.get_mut(&job_id) {
                record.state = JobState::DeadLettered;
                record.attempts = entry.attempts;
            }
            self.shared.dead_letters.push(entry);
            return Err(NavetteError::Queue(format!("{queue}: {error}")));
        }

        log_job_operation("requeue", &job_id.to_string(), queue, 0, "queued", None);
        Ok(())
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses
    pub async fn wait_for_terminal(&self, job_id: JobId, timeout: Duration) -> Option<JobStatus> {
        let poll = async {
            loop {
                match self.job_status(job_id) {
                    Some(status) if status.state.is_terminal() => return Some(status),
                    Some(_) => tokio::time::sleep(Duration::from_millis(5)).await,
                    None => return None,
                }
            }
        };
        tokio::time::timeout(timeout, poll).await.ok().flatten()
    }

    pub fn queue_name(&self) -> &'static str {
        self.shared.handler.queue_name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Stop accepting jobs and wait for in-flight attempts to finish. Jobs still
    /// queued stay `Queued`.
    pub async fn shutdown(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        let worker_count = workers.len();
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "Job worker ended abnormally");
            }
        }

        info!(
            queue = self.shared.handler.queue_name(),
            worker_count = worker_count,
            "Job runner stopped"
        );
    }
}

impl<H: JobHandler> RunnerShared<H> {
    async fn worker_loop(
        self: Arc<Self>,
        worker_index: usize,
        receiver: Arc<Mutex<mpsc::Receiver<JobId>>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!(worker_index = worker_index, "Job worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown_rx.changed() => break,
                job_id = async { receiver.lock().await.recv().await } => job_id,
            };

            match next {
                Some(job_id) => Arc::clone(&self).run_attempt(job_id).await,
                None => break,
            }
        }
        debug!(worker_index = worker_index, "Job worker exiting");
    }

    /// Forget settled jobs older than the retention window. Dead-lettered jobs
    /// stay until requeued.
    fn evict_finished(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.finished_retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };

        let before = self.jobs.len();
        self.jobs.retain(|_, record| {
            !(record.state.is_terminal()
                && record.state != JobState::DeadLettered
                && record.updated_at <= cutoff)
        });
        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            debug!(
                queue = self.handler.queue_name(),
                evicted = evicted,
                "Evicted finished job records"
            );
        }
    }

    /// Apply a transition; `None` when the job is unknown or the move is invalid
    fn apply(&self, job_id: JobId, event: &JobEvent) -> Option<JobState> {
        let mut record = self.jobs.get_mut(&job_id)?;
        match determine_target_state(record.state, event) {
            Ok(next) => {
                record.state = next;
                if let Some(message) = event.message() {
                    record.last_error = Some(message.to_string());
                }
                record.updated_at = Utc::now();
                Some(next)
            }
            Err(error) => {
                warn!(
                    job_id = %job_id,
                    state = %record.state,
                    event = event.event_type(),
                    error = %error,
                    "Ignoring invalid job transition"
                );
                None
            }
        }
    }

    async fn run_attempt(self: Arc<Self>, job_id: JobId) {
        let queue = self.handler.queue_name();
        if self.apply(job_id, &JobEvent::Start).is_none() {
            // Redelivered after it already settled
            return;
        }

        let Some((payload, attempt)) = self.jobs.get_mut(&job_id).map(|mut record| {
            record.attempts += 1;
            (record.payload.clone(), record.attempts)
        }) else {
            return;
        };

        let job_label = job_id.to_string();
        log_job_operation("start", &job_label, queue, attempt, "running", None);

        match self.handler.handle(&payload, attempt).await {
            Ok(JobOutcome::Completed) => {
                self.apply(job_id, &JobEvent::Succeed);
                log_job_operation("complete", &job_label, queue, attempt, "succeeded", None);
            }
            Ok(JobOutcome::Skipped(reason)) => {
                self.apply(job_id, &JobEvent::Skip(reason.clone()));
                log_job_operation("skip", &job_label, queue, attempt, "skipped", Some(&reason));
            }
            Err(error) if error.is_retryable() && self.policy.has_attempts_left(attempt) => {
                let message = error.to_string();
                self.apply(job_id, &JobEvent::Retry(message.clone()));
                let delay = self.policy.delay_before_attempt(attempt + 1);
                warn!(
                    job_id = %job_id,
                    queue = queue,
                    attempt = attempt,
                    max_attempts = self.policy.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job attempt failed, retrying"
                );
                self.schedule_retry(job_id, delay);
            }
            Err(error) if error.is_retryable() => {
                self.dead_letter(job_id, &payload, attempt, error).await;
            }
            Err(error) => {
                let message = error.to_string();
                self.apply(job_id, &JobEvent::Fail(message.clone()));
                warn!(
                    job_id = %job_id,
                    queue = queue,
                    attempt = attempt,
                    error_code = error.error_code(),
                    error = %message,
                    "Job failed without retry"
                );
                log_job_operation("fail", &job_label, queue, attempt, "failed", Some(&message));
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, job_id: JobId, delay: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if sender.send(job_id).await.is_err() {
                warn!(job_id = %job_id, "Queue closed before retry could be delivered");
            }
        });
    }

    async fn dead_letter(&self, job_id: JobId, payload: &H::Payload, attempts: u32, error: NavetteError) {
        let queue = self.handler.queue_name();
        let message = error.to_string();
        self.apply(job_id, &JobEvent::Exhaust(message.clone()));

        let payload = serde_json::to_value(payload)
            .unwrap_or_else(|e| serde_json::json!({ "unserializable_payload": e.to_string() }));

        error!(
            job_id = %job_id,
            queue = queue,
            attempts = attempts,
            payload = %payload,
            error = %message,
            "Job exhausted its retries and was dead-lettered"
        );

        self.dead_letters.push(DeadLetterEntry {
            job_id,
            queue: queue.to_string(),
            payload: payload.clone(),
            error: message.clone(),
            attempts,
            dead_lettered_at: Utc::now(),
        });

        let event = DomainEvent::JobDeadLettered(JobDeadLetteredPayload {
            job_id: job_id.to_string(),
            queue: queue.to_string(),
            attempts,
            error: message,
            payload,
        });
        if let Err(publish_error) = self.events.publish_event(&event).await {
            warn!(job_id = %job_id, error = %publish_error, "Failed to publish dead letter event");
        }
    }
}
