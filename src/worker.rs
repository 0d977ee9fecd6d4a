//! The poll/process/backoff/shutdown loop.
//!
//! Each iteration receives at most one message from the request queue. An
//! empty poll advances the idle counter, possibly shuts the host down, and
//! backs off for the long interval. A delivery is looked up in the job store,
//! run through the recognizer, and its outcome written to the result sink,
//! the job store and the queue, in that order. The three stores share no
//! transaction, so the queue message is only deleted once everything before
//! it has succeeded; any earlier failure leaves the message for redelivery.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::app_state::AppState;
use crate::config::WorkerSettings;
use crate::db::store::JobStore;
use crate::models::job::{Job, JobStatus};
use crate::models::message::{QueueMessage, ShutdownNotice};
use crate::models::recognition::display_text;
use crate::services::{
    host::HostController, queue::QueueClient, recognizer::Recognizer, storage::ResultSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Polling,
    Processing,
    IdleBackoff,
    ShutdownRequested,
}

/// What one iteration of the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty.
    Idle {
        idle_polls: u32,
        shutdown_requested: bool,
    },
    /// A job was run; `status` is the status written back to the job store.
    Processed { identity: String, status: JobStatus },
    /// The delivery named no usable job and was left on the queue.
    Abandoned { identity: String },
    ReceiveFailed,
}

pub struct Worker {
    queue: Arc<dyn QueueClient>,
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultSink>,
    recognizer: Arc<dyn Recognizer>,
    host: Arc<dyn HostController>,
    settings: WorkerSettings,
    idle_polls: u32,
    state: WorkerState,
}

impl Worker {
    pub fn new(state: &AppState, settings: WorkerSettings) -> Self {
        Self {
            queue: Arc::clone(&state.queue),
            jobs: Arc::clone(&state.jobs),
            results: Arc::clone(&state.results),
            recognizer: Arc::clone(&state.recognizer),
            host: Arc::clone(&state.host),
            settings,
            idle_polls: 0,
            state: WorkerState::Polling,
        }
    }

    /// Consecutive empty polls since the last delivery.
    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run forever. Only process termination stops the loop.
    pub async fn run(mut self) {
        tracing::info!(
            queue = %self.settings.request_queue,
            idle_threshold = self.settings.idle_threshold,
            auto_shutdown = self.settings.auto_shutdown,
            "Worker loop started"
        );

        loop {
            let outcome = self.poll_once().await;
            if let Some(pause) = self.pause_after(&outcome) {
                tracing::debug!(sleep_ms = pause.as_millis() as u64, "Worker sleeping");
                sleep(pause).await;
            }
        }
    }

    /// How long to wait before the next poll.
    pub fn pause_after(&self, outcome: &PollOutcome) -> Option<Duration> {
        match outcome {
            PollOutcome::Idle { .. } | PollOutcome::ReceiveFailed => {
                Some(self.settings.max_sleep())
            }
            PollOutcome::Processed { .. } => Some(self.settings.min_sleep()),
            PollOutcome::Abandoned { .. } => None,
        }
    }

    /// One iteration of the loop, without the trailing sleep.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.state = WorkerState::Polling;
        tracing::debug!(queue = %self.settings.request_queue, "Polling request queue");

        let messages = match self.queue.receive(&self.settings.request_queue).await {
            Ok(messages) => messages,
            Err(e) => {
                metrics::counter!("worker_polls_total", "result" => "error").increment(1);
                tracing::error!(
                    queue = %self.settings.request_queue,
                    error = %e,
                    "Failed to receive from request queue"
                );
                self.state = WorkerState::IdleBackoff;
                return PollOutcome::ReceiveFailed;
            }
        };

        // Only the first message is used; any others become visible again later.
        match messages.into_iter().next() {
            Some(message) => {
                metrics::counter!("worker_polls_total", "result" => "message").increment(1);
                self.idle_polls = 0;
                metrics::gauge!("worker_idle_polls").set(0.0);
                self.state = WorkerState::Processing;
                self.process(message).await
            }
            None => {
                metrics::counter!("worker_polls_total", "result" => "empty").increment(1);
                self.on_empty_poll().await
            }
        }
    }

    async fn on_empty_poll(&mut self) -> PollOutcome {
        self.idle_polls = self.idle_polls.saturating_add(1);
        metrics::gauge!("worker_idle_polls").set(f64::from(self.idle_polls));

        // Re-checked on every empty poll, so shutdown fires again each poll past the threshold.
        let shutdown_requested =
            self.settings.auto_shutdown && self.idle_polls >= self.settings.idle_threshold;
        if shutdown_requested {
            self.state = WorkerState::ShutdownRequested;
            self.request_shutdown().await;
        }

        self.state = WorkerState::IdleBackoff;
        tracing::debug!(idle_polls = self.idle_polls, "Request queue empty");

        PollOutcome::Idle {
            idle_polls: self.idle_polls,
            shutdown_requested,
        }
    }

    async fn request_shutdown(&self) {
        metrics::counter!("worker_shutdown_requests_total").increment(1);
        tracing::warn!(
            idle_polls = self.idle_polls,
            threshold = self.settings.idle_threshold,
            "Idle threshold reached, shutting down instance"
        );

        if let Err(e) = self.host.shutdown().await {
            tracing::error!(error = %e, "Failed to issue host shutdown");
        }

        let notice = ShutdownNotice {
            instance_id: self.settings.instance_id.clone(),
            idle_polls: self.idle_polls,
            requested_at: Utc::now(),
        };
        let body = match serde_json::to_string(&notice) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode shutdown notice");
                return;
            }
        };

        if let Err(e) = self
            .queue
            .send(
                &self.settings.shutdown_queue,
                &self.settings.shutdown_queue_group,
                &body,
            )
            .await
        {
            tracing::warn!(
                queue = %self.settings.shutdown_queue,
                error = %e,
                "Failed to publish shutdown notice"
            );
        }
    }

    async fn process(&self, message: QueueMessage) -> PollOutcome {
        let identity = message.body.clone();

        let mut job = match self.jobs.get(&identity).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                metrics::counter!("worker_jobs_abandoned_total").increment(1);
                tracing::warn!(
                    job_id = %identity,
                    message_id = %message.message_id,
                    "Job not found, leaving message for redelivery"
                );
                return PollOutcome::Abandoned { identity };
            }
            Err(e) => {
                metrics::counter!("worker_jobs_abandoned_total").increment(1);
                tracing::error!(
                    job_id = %identity,
                    error = %e,
                    "Failed to load job, leaving message for redelivery"
                );
                return PollOutcome::Abandoned { identity };
            }
        };

        tracing::info!(
            job_id = %job.identity,
            resource_url = %job.resource_url,
            receive_count = message.receive_count,
            "Processing recognition job"
        );

        let start = Instant::now();
        let outcome = self.recognizer.recognize(&job.resource_url).await;
        metrics::histogram!("worker_recognition_seconds").record(start.elapsed().as_secs_f64());

        let status = match outcome.recognized_text().map(str::to_string) {
            Some(text) => self.complete(&mut job, &message, text).await,
            None => self.fail(&mut job, &message, outcome.error).await,
        };

        PollOutcome::Processed { identity, status }
    }

    async fn complete(&self, job: &mut Job, message: &QueueMessage, result: String) -> JobStatus {
        let label = display_text(&result).to_string();

        if let Err(e) = self.results.put(&job.input_filename, &label).await {
            let error = format!("failed to store result: {e}");
            tracing::error!(
                job_id = %job.identity,
                key = %job.input_filename,
                error = %e,
                "Failed to store result"
            );
            // Past the retry cap a sink that keeps rejecting the key fails the job for good.
            if self.settings.is_final_attempt(message.receive_count) {
                return self.fail(job, message, Some(error)).await;
            }
            job.mark_retryable(Some(result), error);
            self.persist(job).await;
            return job.status;
        }

        job.mark_complete(result, Utc::now());
        if !self.persist(job).await {
            return job.status;
        }

        self.delete(message, &job.identity).await;
        metrics::counter!("worker_jobs_completed_total").increment(1);
        tracing::info!(
            job_id = %job.identity,
            result = %label,
            "Job completed"
        );
        job.status
    }

    async fn fail(
        &self,
        job: &mut Job,
        message: &QueueMessage,
        error: Option<String>,
    ) -> JobStatus {
        let error = error.unwrap_or_else(|| "recognizer returned an empty result".to_string());
        let final_attempt = self.settings.is_final_attempt(message.receive_count);

        if final_attempt {
            job.mark_failed(format!(
                "{error} (giving up after {} attempts)",
                message.receive_count
            ));
        } else {
            job.mark_failed(error);
        }

        metrics::counter!("worker_jobs_failed_total").increment(1);
        tracing::warn!(
            job_id = %job.identity,
            receive_count = message.receive_count,
            final_attempt,
            error = job.error.as_deref().unwrap_or_default(),
            "Job failed"
        );

        // Deleting a final failure only after it is recorded keeps it retryable otherwise.
        if self.persist(job).await && final_attempt {
            self.delete(message, &job.identity).await;
        }
        job.status
    }

    async fn persist(&self, job: &Job) -> bool {
        match self.jobs.update(job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    job_id = %job.identity,
                    status = %job.status,
                    error = %e,
                    "Failed to update job, leaving message for redelivery"
                );
                false
            }
        }
    }

    async fn delete(&self, message: &QueueMessage, identity: &str) {
        if let Err(e) = self
            .queue
            .delete(&self.settings.request_queue, &message.receipt_handle)
            .await
        {
            tracing::error!(
                job_id = %identity,
                message_id = %message.message_id,
                error = %e,
                "Failed to delete message, job may be redelivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{MockJobStore, StoreError};
    use crate::models::recognition::RecognitionOutcome;
    use crate::services::host::{HostError, MockHostController};
    use crate::services::queue::{MockQueueClient, QueueError};
    use crate::services::recognizer::MockRecognizer;
    use crate::services::storage::{MockResultSink, StorageError};
    use chrono::DateTime;
    use mockall::Sequence;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            request_queue: "image-requests".to_string(),
            request_queue_group: "image-requests-group".to_string(),
            shutdown_queue: "instance-shutdown".to_string(),
            shutdown_queue_group: "instance-shutdown-group".to_string(),
            max_sleep_ms: 20_000,
            min_sleep_ms: 1_000,
            idle_threshold: 3,
            auto_shutdown: true,
            max_receive_count: 5,
            instance_id: "worker-1".to_string(),
        }
    }

    struct Mocks {
        queue: MockQueueClient,
        jobs: MockJobStore,
        results: MockResultSink,
        recognizer: MockRecognizer,
        host: MockHostController,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                queue: MockQueueClient::new(),
                jobs: MockJobStore::new(),
                results: MockResultSink::new(),
                recognizer: MockRecognizer::new(),
                host: MockHostController::new(),
            }
        }

        fn into_worker(self, settings: WorkerSettings) -> Worker {
            let state = AppState::new(
                self.queue,
                self.jobs,
                self.results,
                self.recognizer,
                self.host,
            );
            Worker::new(&state, settings)
        }
    }

    fn message(body: &str, receive_count: u32) -> QueueMessage {
        QueueMessage {
            message_id: "msg-1".to_string(),
            body: body.to_string(),
            receipt_handle: "receipt-1".to_string(),
            receive_count,
        }
    }

    fn pending_job() -> Job {
        Job::new("job-42", "http://x/img.jpg", "img.jpg")
    }

    fn deliver(queue: &mut MockQueueClient, msg: QueueMessage) {
        queue
            .expect_receive()
            .withf(|queue| queue == "image-requests")
            .times(1)
            .return_once(move |_| Ok(vec![msg]));
    }

    fn recognize(recognizer: &mut MockRecognizer, outcome: RecognitionOutcome) {
        recognizer
            .expect_recognize()
            .withf(|url| url == "http://x/img.jpg")
            .times(1)
            .return_once(move |_| outcome);
    }

    fn find_job(jobs: &mut MockJobStore) {
        jobs.expect_get()
            .withf(|identity| identity == "job-42")
            .times(1)
            .returning(|_| Ok(Some(pending_job())));
    }

    #[tokio::test]
    async fn test_successful_job_end_to_end() {
        let started: DateTime<Utc> = Utc::now();
        let mut mocks = Mocks::new();
        let mut seq = Sequence::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        find_job(&mut mocks.jobs);
        recognize(
            &mut mocks.recognizer,
            RecognitionOutcome::recognized("dog (score 0.81)"),
        );
        mocks
            .results
            .expect_put()
            .withf(|key, value| key == "img.jpg" && value == "dog ")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mocks
            .jobs
            .expect_update()
            .withf(move |job: &Job| {
                job.status == JobStatus::Complete
                    && job.result.as_deref() == Some("dog (score 0.81)")
                    && job.error.is_none()
                    && job.completed_at.is_some_and(|at| at >= started)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .queue
            .expect_delete()
            .withf(|queue, receipt| queue == "image-requests" && receipt == "receipt-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;

        assert_eq!(
            outcome,
            PollOutcome::Processed {
                identity: "job-42".to_string(),
                status: JobStatus::Complete,
            }
        );
        assert_eq!(worker.pause_after(&outcome), Some(Duration::from_secs(1)));
        assert_eq!(worker.state(), WorkerState::Processing);
    }

    #[tokio::test]
    async fn test_empty_result_fails_without_delete() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        find_job(&mut mocks.jobs);
        recognize(&mut mocks.recognizer, RecognitionOutcome::recognized(""));
        mocks
            .jobs
            .expect_update()
            .withf(|job: &Job| {
                job.status == JobStatus::Failed
                    && job.result.is_none()
                    && job.completed_at.is_none()
                    && job.error.as_deref() == Some("recognizer returned an empty result")
            })
            .times(1)
            .returning(|_| Ok(()));
        // No expectations on delete or put: any call fails the test.

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;

        assert_eq!(
            outcome,
            PollOutcome::Processed {
                identity: "job-42".to_string(),
                status: JobStatus::Failed,
            }
        );
    }

    #[tokio::test]
    async fn test_recognizer_error_text_is_kept() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 2));
        find_job(&mut mocks.jobs);
        recognize(
            &mut mocks.recognizer,
            RecognitionOutcome::failed("recognition timed out after 120s"),
        );
        mocks
            .jobs
            .expect_update()
            .withf(|job: &Job| {
                job.status == JobStatus::Failed
                    && job.error.as_deref() == Some("recognition timed out after 120s")
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut worker = mocks.into_worker(settings());
        worker.poll_once().await;
    }

    #[tokio::test]
    async fn test_final_failed_attempt_deletes_message() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 5));
        find_job(&mut mocks.jobs);
        recognize(&mut mocks.recognizer, RecognitionOutcome::failed("bad image"));
        mocks
            .jobs
            .expect_update()
            .withf(|job: &Job| {
                job.status == JobStatus::Failed
                    && job.error.as_deref() == Some("bad image (giving up after 5 attempts)")
            })
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .queue
            .expect_delete()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed { status: JobStatus::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn test_final_failure_kept_when_update_fails() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 7));
        find_job(&mut mocks.jobs);
        recognize(&mut mocks.recognizer, RecognitionOutcome::failed("bad image"));
        mocks
            .jobs
            .expect_update()
            .times(1)
            .returning(|job| Err(StoreError::NotFound(job.identity.clone())));

        let mut worker = mocks.into_worker(settings());
        worker.poll_once().await;
    }

    #[tokio::test]
    async fn test_missing_job_is_abandoned_without_side_effects() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-404", 1));
        mocks
            .jobs
            .expect_get()
            .withf(|identity| identity == "job-404")
            .times(1)
            .returning(|_| Ok(None));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;

        assert_eq!(
            outcome,
            PollOutcome::Abandoned {
                identity: "job-404".to_string()
            }
        );
        assert_eq!(worker.pause_after(&outcome), None);
    }

    #[tokio::test]
    async fn test_store_lookup_error_is_abandoned() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        mocks
            .jobs
            .expect_get()
            .times(1)
            .returning(|_| Err(StoreError::InvalidStatus("PROCESSING".to_string())));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert!(matches!(outcome, PollOutcome::Abandoned { .. }));
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_job_pending() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        find_job(&mut mocks.jobs);
        recognize(
            &mut mocks.recognizer,
            RecognitionOutcome::recognized("dog (score 0.81)"),
        );
        mocks
            .results
            .expect_put()
            .times(1)
            .returning(|_, _| Err(StorageError::Config("bucket unreachable".to_string())));
        mocks
            .jobs
            .expect_update()
            .withf(|job: &Job| {
                job.status == JobStatus::Pending
                    && job.completed_at.is_none()
                    && job
                        .error
                        .as_deref()
                        .is_some_and(|e| e.starts_with("failed to store result"))
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed { status: JobStatus::Pending, .. }
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_on_final_attempt_fails_job() {
        let mut mocks = Mocks::new();
        let mut seq = Sequence::new();

        deliver(&mut mocks.queue, message("job-42", 10));
        find_job(&mut mocks.jobs);
        recognize(
            &mut mocks.recognizer,
            RecognitionOutcome::recognized("dog (score 0.81)"),
        );
        mocks.results.expect_put().times(1).returning(|key, _| {
            Err(StorageError::Status {
                key: key.to_string(),
                status: 403,
            })
        });
        mocks
            .jobs
            .expect_update()
            .withf(|job: &Job| {
                job.status == JobStatus::Failed
                    && job.result.is_none()
                    && job.error.as_deref()
                        == Some(
                            "failed to store result: Storage returned status 403 for key \
                             img.jpg (giving up after 10 attempts)",
                        )
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .queue
            .expect_delete()
            .withf(|queue, receipt| queue == "image-requests" && receipt == "receipt-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert_eq!(
            outcome,
            PollOutcome::Processed {
                identity: "job-42".to_string(),
                status: JobStatus::Failed,
            }
        );
    }

    #[tokio::test]
    async fn test_update_failure_leaves_message() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        find_job(&mut mocks.jobs);
        recognize(
            &mut mocks.recognizer,
            RecognitionOutcome::recognized("dog (score 0.81)"),
        );
        mocks.results.expect_put().times(1).returning(|_, _| Ok(()));
        mocks
            .jobs
            .expect_update()
            .times(1)
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let mut worker = mocks.into_worker(settings());
        worker.poll_once().await;
    }

    #[tokio::test]
    async fn test_delete_failure_is_not_fatal() {
        let mut mocks = Mocks::new();

        deliver(&mut mocks.queue, message("job-42", 1));
        find_job(&mut mocks.jobs);
        recognize(&mut mocks.recognizer, RecognitionOutcome::recognized("dog"));
        mocks.results.expect_put().times(1).returning(|_, _| Ok(()));
        mocks.jobs.expect_update().times(1).returning(|_| Ok(()));
        mocks
            .queue
            .expect_delete()
            .times(1)
            .returning(|_, receipt| Err(QueueError::InvalidReceipt(receipt.to_string())));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Processed { status: JobStatus::Complete, .. }
        ));
    }

    #[tokio::test]
    async fn test_reprocessing_overwrites_same_key() {
        let mut mocks = Mocks::new();

        mocks
            .queue
            .expect_receive()
            .times(2)
            .returning(|_| Ok(vec![message("job-42", 1)]));
        mocks
            .jobs
            .expect_get()
            .times(2)
            .returning(|_| Ok(Some(pending_job())));
        mocks
            .recognizer
            .expect_recognize()
            .times(2)
            .returning(|_| RecognitionOutcome::recognized("dog (score 0.81)"));
        mocks
            .results
            .expect_put()
            .withf(|key, value| key == "img.jpg" && value == "dog ")
            .times(2)
            .returning(|_, _| Ok(()));
        mocks.jobs.expect_update().times(2).returning(|_| Ok(()));
        mocks.queue.expect_delete().times(2).returning(|_, _| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let first = worker.poll_once().await;
        let second = worker.poll_once().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_shutdown_fires_at_threshold_and_after() {
        let mut mocks = Mocks::new();

        mocks
            .queue
            .expect_receive()
            .times(5)
            .returning(|_| Ok(Vec::new()));
        // Polls #3, #4 and #5 are all at or past the threshold.
        mocks.host.expect_shutdown().times(3).returning(|| Ok(()));
        mocks
            .queue
            .expect_send()
            .withf(|queue, group, body| {
                let notice: ShutdownNotice = serde_json::from_str(body).unwrap();
                queue == "instance-shutdown"
                    && group == "instance-shutdown-group"
                    && notice.instance_id == "worker-1"
                    && notice.idle_polls >= 3
            })
            .times(3)
            .returning(|_, _, _| Ok(()));

        let mut worker = mocks.into_worker(settings());
        let mut fired = Vec::new();
        for _ in 0..5 {
            match worker.poll_once().await {
                PollOutcome::Idle {
                    idle_polls,
                    shutdown_requested,
                } => fired.push((idle_polls, shutdown_requested)),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(
            fired,
            vec![(1, false), (2, false), (3, true), (4, true), (5, true)]
        );
        assert_eq!(worker.idle_polls(), 5);
        assert_eq!(worker.state(), WorkerState::IdleBackoff);
    }

    #[tokio::test]
    async fn test_no_shutdown_when_disabled() {
        let mut mocks = Mocks::new();
        mocks
            .queue
            .expect_receive()
            .times(4)
            .returning(|_| Ok(Vec::new()));

        let mut worker = mocks.into_worker(WorkerSettings {
            auto_shutdown: false,
            ..settings()
        });
        for _ in 0..4 {
            let outcome = worker.poll_once().await;
            assert!(matches!(
                outcome,
                PollOutcome::Idle { shutdown_requested: false, .. }
            ));
            assert_eq!(worker.pause_after(&outcome), Some(Duration::from_secs(20)));
        }
    }

    #[tokio::test]
    async fn test_shutdown_notice_sent_even_if_host_fails() {
        let mut mocks = Mocks::new();
        mocks
            .queue
            .expect_receive()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        mocks.host.expect_shutdown().times(1).returning(|| {
            Err(HostError::Spawn {
                program: "sudo".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        mocks
            .queue
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(QueueError::InvalidReceipt("n/a".to_string())));

        let mut worker = mocks.into_worker(WorkerSettings {
            idle_threshold: 1,
            ..settings()
        });
        let outcome = worker.poll_once().await;
        assert_eq!(
            outcome,
            PollOutcome::Idle {
                idle_polls: 1,
                shutdown_requested: true
            }
        );
    }

    #[tokio::test]
    async fn test_delivery_resets_idle_counter() {
        let mut mocks = Mocks::new();
        let mut seq = Sequence::new();

        mocks
            .queue
            .expect_receive()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Vec::new()));
        mocks
            .queue
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![message("job-404", 1)]));
        mocks
            .queue
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Vec::new()));
        mocks.jobs.expect_get().times(1).returning(|_| Ok(None));

        let mut worker = mocks.into_worker(settings());
        worker.poll_once().await;
        worker.poll_once().await;
        assert_eq!(worker.idle_polls(), 2);

        worker.poll_once().await;
        assert_eq!(worker.idle_polls(), 0);

        let outcome = worker.poll_once().await;
        assert_eq!(
            outcome,
            PollOutcome::Idle {
                idle_polls: 1,
                shutdown_requested: false
            }
        );
    }

    #[tokio::test]
    async fn test_only_first_message_is_processed() {
        let mut mocks = Mocks::new();

        mocks
            .queue
            .expect_receive()
            .times(1)
            .returning(|_| Ok(vec![message("job-404", 1), message("job-42", 1)]));
        mocks
            .jobs
            .expect_get()
            .withf(|identity| identity == "job-404")
            .times(1)
            .returning(|_| Ok(None));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;
        assert!(matches!(outcome, PollOutcome::Abandoned { identity } if identity == "job-404"));
    }

    #[tokio::test]
    async fn test_receive_error_leaves_idle_counter() {
        let mut mocks = Mocks::new();
        mocks
            .queue
            .expect_receive()
            .times(1)
            .returning(|_| Err(QueueError::InvalidReceipt("n/a".to_string())));

        let mut worker = mocks.into_worker(settings());
        let outcome = worker.poll_once().await;

        assert_eq!(outcome, PollOutcome::ReceiveFailed);
        assert_eq!(worker.idle_polls(), 0);
        assert_eq!(worker.pause_after(&outcome), Some(Duration::from_secs(20)));
    }
}
