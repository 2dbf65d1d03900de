//! Dispatch Scheduler - Drives every job of a run to exactly one outcome
//!
//! Jobs are processed in chunks of `profile.chunk_size`, each chunk under a
//! semaphore of `profile.max_concurrent` permits. A job moves through
//! `Pending -> InFlight -> Succeeded | Failed`, going back to `Pending`
//! after a retriable failure until its attempt budget is spent.

use super::job::{BatchSummary, DeliveryOutcome, DispatchJob, OutcomeStatus};
use super::rate_limiter::RateLimiter;
use crate::attachments::LoadedAttachment;
use crate::error::{DeliveryError, DispatchError, ErrorKind};
use crate::metrics::DispatchMetrics;
use crate::provider::ProviderProfile;
use crate::smtp::DeliveryClient;
use crate::template::TemplateRenderer;
use chrono::{Local, Utc};
use mailblast_common::types::SmtpCredential;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Receives every terminal outcome, exactly once per job
pub type OutcomeCallback = Arc<dyn Fn(&DeliveryOutcome) + Send + Sync>;

/// Attachments of a run, loaded before the first job
#[derive(Debug, Clone)]
pub enum AttachmentSet {
    Ready(Arc<Vec<LoadedAttachment>>),
    /// Loading failed; every job ends with this error
    Unavailable(DeliveryError),
}

impl AttachmentSet {
    pub fn none() -> Self {
        AttachmentSet::Ready(Arc::new(Vec::new()))
    }
}

/// Everything a run needs besides the scheduler itself
pub struct BatchRequest {
    pub jobs: Vec<DispatchJob>,
    pub credential: Arc<SmtpCredential>,
    pub profile: ProviderProfile,
    pub attachments: AttachmentSet,
    pub cancel: CancellationToken,
}

/// Dispatch scheduler
pub struct DispatchScheduler {
    client: Arc<dyn DeliveryClient>,
    renderer: TemplateRenderer,
    max_jobs_per_run: usize,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl DispatchScheduler {
    /// Create a new scheduler
    pub fn new(client: Arc<dyn DeliveryClient>, max_jobs_per_run: usize) -> Self {
        Self {
            client,
            renderer: TemplateRenderer::new(),
            max_jobs_per_run,
            metrics: None,
        }
    }

    /// Set the renderer
    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set the metrics sink
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Preconditions checked once before any job starts
    pub fn validate(&self, job_count: usize, credential: &SmtpCredential) -> Result<(), DispatchError> {
        if job_count > self.max_jobs_per_run {
            return Err(DispatchError::TooManyJobs {
                requested: job_count,
                max: self.max_jobs_per_run,
            });
        }
        credential.validate().map_err(|e| match e {
            mailblast_common::Error::Config(msg) => DispatchError::Configuration(msg),
            other => DispatchError::Configuration(other.to_string()),
        })
    }

    /// Run every job to a terminal outcome and summarize the run
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        on_outcome: OutcomeCallback,
    ) -> Result<BatchSummary, DispatchError> {
        self.validate(request.jobs.len(), &request.credential)?;

        let total = request.jobs.len();
        if total == 0 {
            return Ok(BatchSummary::empty());
        }

        let started = Instant::now();
        let profile = request.profile.normalized();
        let shared = Arc::new(RunShared {
            client: self.client.clone(),
            renderer: self.renderer.clone(),
            credential: request.credential,
            profile,
            attachments: request.attachments,
            limiter: RateLimiter::new(profile.rate_per_minute, profile.burst_limit),
            semaphore: Semaphore::new(profile.max_concurrent),
            cancel: request.cancel,
            auth_failure: OnceLock::new(),
            sink: OutcomeSink::new(total, on_outcome, self.metrics.clone()),
            metrics: self.metrics.clone(),
        });

        let jobs: Vec<(usize, DispatchJob)> = request.jobs.into_iter().enumerate().collect();
        let chunk_count = jobs.len().div_ceil(profile.chunk_size);

        for (chunk_no, chunk) in jobs.chunks(profile.chunk_size).enumerate() {
            if shared.cancel.is_cancelled() {
                for (index, job) in chunk {
                    shared.sink.emit(DeliveryOutcome::aborted(*index, job, None, 0, Utc::now()));
                }
                continue;
            }

            debug!(chunk = chunk_no + 1, chunks = chunk_count, size = chunk.len(), "Starting chunk");

            let mut tasks = JoinSet::new();
            for (index, job) in chunk {
                tasks.spawn(run_job(shared.clone(), *index, job.clone()));
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Delivery task error: {}", e);
                }
            }

            // A task that died without reporting still owes its outcome
            for (index, job) in chunk {
                if !shared.sink.is_emitted(*index) {
                    let err = DeliveryError::new(
                        ErrorKind::TransientTransport,
                        "Delivery task stopped before reporting a result",
                    );
                    shared.sink.emit(DeliveryOutcome::failed(*index, job, &err, 0, Utc::now()));
                }
            }

            if chunk_no + 1 < chunk_count && profile.inter_chunk_delay_ms > 0 {
                shared
                    .pause(Duration::from_millis(profile.inter_chunk_delay_ms))
                    .await;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(shared.sink.summary(elapsed_ms, shared.cancel.is_cancelled()))
    }
}

/// State shared by the jobs of one run
struct RunShared {
    client: Arc<dyn DeliveryClient>,
    renderer: TemplateRenderer,
    credential: Arc<SmtpCredential>,
    profile: ProviderProfile,
    attachments: AttachmentSet,
    limiter: RateLimiter,
    semaphore: Semaphore,
    cancel: CancellationToken,
    /// First authentication failure of the run
    auth_failure: OnceLock<DeliveryError>,
    sink: OutcomeSink,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl RunShared {
    /// Sleep unless the run is cancelled first
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    /// Exponential backoff for the given attempt, never shorter than the server hint
    fn retry_delay(&self, attempt: u32, error: &DeliveryError) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let backoff = Duration::from_millis(self.profile.retry_backoff_ms.saturating_mul(factor));
        backoff.max(error.retry_after.unwrap_or_default())
    }
}

enum Step {
    Done,
    Retry(Duration),
}

async fn run_job(shared: Arc<RunShared>, index: usize, job: DispatchJob) {
    let started_at = Utc::now();

    let attachments = match &shared.attachments {
        AttachmentSet::Ready(list) => list.clone(),
        AttachmentSet::Unavailable(err) => {
            shared.sink.emit(DeliveryOutcome::failed(index, &job, err, 0, started_at));
            return;
        }
    };

    let message = shared
        .renderer
        .render(&job.template, &job.recipient, Local::now().naive_local());

    let mut attempts = 0u32;
    let mut last_error: Option<DeliveryError> = None;

    loop {
        let step = {
            let permit = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                permit = shared.semaphore.acquire() => permit.ok(),
            };
            let Some(_permit) = permit else {
                shared.sink.emit(DeliveryOutcome::aborted(index, &job, last_error.as_ref(), attempts, started_at));
                return;
            };

            if let Some(auth) = shared.auth_failure.get() {
                let err = DeliveryError::new(
                    ErrorKind::Authentication,
                    format!("Skipped after SMTP authentication failed: {}", auth.message),
                );
                shared.sink.emit(DeliveryOutcome::failed(index, &job, &err, attempts, started_at));
                return;
            }

            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => {
                    shared.sink.emit(DeliveryOutcome::aborted(index, &job, last_error.as_ref(), attempts, started_at));
                    return;
                }
                _ = shared.limiter.acquire() => {}
            }

            attempts += 1;
            debug!(job_index = index, recipient = %job.recipient.email, attempt = attempts, "Sending email");

            let result = {
                let _attempt = shared.metrics.as_ref().map(|m| m.attempt_started());
                shared
                    .client
                    .send(&shared.credential, &message, &job.recipient, &attachments)
                    .await
            };

            let step = match result {
                Ok(receipt) => {
                    shared.sink.emit(DeliveryOutcome::succeeded(
                        index,
                        &job,
                        receipt.message_id,
                        attempts,
                        started_at,
                    ));
                    Step::Done
                }
                Err(err) => {
                    if err.kind == ErrorKind::Authentication {
                        let _ = shared.auth_failure.set(err.clone());
                    }

                    if err.kind.is_retriable() && attempts < shared.profile.max_retries {
                        let delay = shared.retry_delay(attempts, &err);
                        if err.kind == ErrorKind::RateLimited {
                            shared.limiter.defer(delay);
                        }
                        warn!(
                            job_index = index,
                            recipient = %job.recipient.email,
                            attempt = attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "Send failed, will retry"
                        );
                        last_error = Some(err);
                        Step::Retry(delay)
                    } else {
                        warn!(
                            job_index = index,
                            recipient = %job.recipient.email,
                            attempts,
                            error = %err,
                            "Send failed"
                        );
                        shared.sink.emit(DeliveryOutcome::failed(index, &job, &err, attempts, started_at));
                        Step::Done
                    }
                }
            };

            if shared.profile.inter_send_delay_ms > 0 {
                shared
                    .pause(Duration::from_millis(shared.profile.inter_send_delay_ms))
                    .await;
            }
            step
        };

        match step {
            Step::Done => return,
            Step::Retry(delay) => {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => {
                        shared.sink.emit(DeliveryOutcome::aborted(index, &job, last_error.as_ref(), attempts, started_at));
                        return;
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// Delivers outcomes to the callback, at most once per job
struct OutcomeSink {
    emitted: Vec<AtomicBool>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
    callback: OutcomeCallback,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl OutcomeSink {
    fn new(total: usize, callback: OutcomeCallback, metrics: Option<Arc<DispatchMetrics>>) -> Self {
        Self {
            emitted: (0..total).map(|_| AtomicBool::new(false)).collect(),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            callback,
            metrics,
        }
    }

    fn is_emitted(&self, index: usize) -> bool {
        self.emitted
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn emit(&self, outcome: DeliveryOutcome) {
        let Some(flag) = self.emitted.get(outcome.job_index) else {
            error!(job_index = outcome.job_index, "Outcome for unknown job");
            return;
        };
        if flag.swap(true, Ordering::SeqCst) {
            warn!(job_index = outcome.job_index, "Duplicate outcome suppressed");
            return;
        }

        match outcome.status {
            OutcomeStatus::Succeeded => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            OutcomeStatus::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            OutcomeStatus::Aborted => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.aborted.fetch_add(1, Ordering::SeqCst);
            }
        }

        debug!(
            job_index = outcome.job_index,
            recipient = %outcome.recipient_email,
            status = outcome.status.as_str(),
            attempts = outcome.attempt_count,
            "Job finished"
        );

        if let Some(metrics) = &self.metrics {
            metrics.observe_outcome(&outcome);
        }
        (self.callback)(&outcome);
    }

    fn summary(&self, elapsed_ms: u64, cancelled: bool) -> BatchSummary {
        BatchSummary::from_counts(
            self.emitted.len(),
            self.succeeded.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
            self.aborted.load(Ordering::SeqCst),
            elapsed_ms,
            cancelled,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{credential, jobs, outcome_collector, ScriptedClient};
    use crate::provider::DispatchOverrides;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn scheduler(client: Arc<ScriptedClient>) -> DispatchScheduler {
        DispatchScheduler::new(client, 10_000)
    }

    fn request(jobs: Vec<DispatchJob>, profile: ProviderProfile) -> BatchRequest {
        BatchRequest {
            jobs,
            credential: Arc::new(credential("smtp.example.com")),
            profile,
            attachments: AttachmentSet::none(),
            cancel: CancellationToken::new(),
        }
    }

    fn generic() -> ProviderProfile {
        ProviderProfile::resolve("smtp.example.com")
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch() {
        let client = Arc::new(ScriptedClient::succeeding());
        let (callback, outcomes) = outcome_collector();

        let summary = scheduler(client.clone())
            .run_batch(request(Vec::new(), generic()), callback)
            .await
            .unwrap();

        assert_eq!(summary, BatchSummary::empty());
        assert_eq!(client.call_count(), 0);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_success() {
        let client = Arc::new(ScriptedClient::succeeding());
        let (callback, outcomes) = outcome_collector();

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(10), generic()), callback)
            .await
            .unwrap();

        assert_eq!(summary.total, 10);
        assert_eq!(summary.succeeded, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.success_rate_percent, 100.0);

        let outcomes = outcomes.lock().unwrap();
        let indices: HashSet<usize> = outcomes.iter().map(|o| o.job_index).collect();
        assert_eq!(outcomes.len(), 10);
        assert_eq!(indices.len(), 10);
        assert!(outcomes.iter().all(|o| o.provider_message_id.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcome() {
        let client = Arc::new(ScriptedClient::new(|email, _attempt| {
            if email == "r2@example.com" || email == "r4@example.com" {
                Err(DeliveryError::new(ErrorKind::PermanentRejection, "550 5.1.1 user unknown"))
            } else {
                Ok(())
            }
        }));
        let (callback, outcomes) = outcome_collector();

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(5), generic()), callback)
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate_percent, 60.0);

        let outcomes = outcomes.lock().unwrap();
        let rejected: Vec<&DeliveryOutcome> = outcomes
            .iter()
            .filter(|o| o.error_kind == Some(ErrorKind::PermanentRejection))
            .collect();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|o| o.attempt_count == 1));
        // Permanent rejections are not retried
        assert_eq!(client.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let client = Arc::new(ScriptedClient::succeeding().with_delay(Duration::from_millis(300)));
        let (callback, _outcomes) = outcome_collector();
        let profile = generic().with_overrides(&DispatchOverrides {
            chunk_size: Some(25),
            max_concurrent: Some(3),
        });

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(40), profile), callback)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 40);
        assert!(client.max_inflight() <= 3, "max in flight {}", client.max_inflight());
        assert!(client.max_inflight() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_run_in_order_with_pause_between() {
        let send_time = Duration::from_millis(200);
        let client = Arc::new(ScriptedClient::succeeding().with_delay(send_time));
        let (callback, _outcomes) = outcome_collector();
        let mut profile = generic().with_overrides(&DispatchOverrides {
            chunk_size: Some(2),
            max_concurrent: Some(2),
        });
        profile.inter_send_delay_ms = 0;
        profile.inter_chunk_delay_ms = 1_000;
        let pause = Duration::from_millis(profile.inter_chunk_delay_ms);

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(6), profile), callback)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 6);

        let chunk_starts = |k: usize| -> Vec<Instant> {
            [2 * k + 1, 2 * k + 2]
                .iter()
                .flat_map(|i| client.attempt_times(&format!("r{}@example.com", i)))
                .collect()
        };
        for k in 1..3 {
            let previous_end = *chunk_starts(k - 1).iter().max().unwrap() + send_time;
            let start = *chunk_starts(k).iter().min().unwrap();
            assert!(
                start >= previous_end + pause,
                "chunk {} started {:?} after the previous one ended",
                k,
                start - previous_end
            );
        }

        // Three chunks of sends and two pauses; nothing after the last chunk
        let busy_ms = (3 * send_time + 2 * pause).as_millis() as u64;
        assert!(summary.total_duration_ms >= busy_ms);
        assert!(
            summary.total_duration_ms < busy_ms + profile.inter_chunk_delay_ms,
            "run took {} ms",
            summary.total_duration_ms
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_ceiling() {
        let client = Arc::new(ScriptedClient::succeeding());
        let (callback, _outcomes) = outcome_collector();
        let profile = ProviderProfile::resolve("smtp.gmail.com");

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(45), profile), callback)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 45);

        let calls = client.call_times();
        for (i, start) in calls.iter().enumerate() {
            let in_minute = calls[i..]
                .iter()
                .filter(|t| **t < *start + Duration::from_secs(60))
                .count();
            assert!(in_minute <= profile.rate_per_minute as usize);
            let in_second = calls[i..]
                .iter()
                .filter(|t| **t < *start + Duration::from_secs(1))
                .count();
            assert!(in_second <= profile.burst_limit as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_and_exhaustion() {
        let client = Arc::new(ScriptedClient::new(|email, attempt| match email {
            "r1@example.com" if attempt < 3 => Err(DeliveryError::new(
                ErrorKind::TransientTransport,
                "451 4.3.0 temporary failure",
            )),
            "r2@example.com" => Err(DeliveryError::new(
                ErrorKind::TransientTransport,
                "Connection refused",
            )),
            _ => Ok(()),
        }));
        let (callback, outcomes) = outcome_collector();
        let profile = generic();

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(3), profile), callback)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        let outcomes = outcomes.lock().unwrap();
        let by_email = |email: &str| {
            outcomes
                .iter()
                .find(|o| o.recipient_email == email)
                .cloned()
                .unwrap()
        };

        let recovered = by_email("r1@example.com");
        assert_eq!(recovered.status, OutcomeStatus::Succeeded);
        assert_eq!(recovered.attempt_count, 3);

        let exhausted = by_email("r2@example.com");
        assert_eq!(exhausted.status, OutcomeStatus::Failed);
        assert_eq!(exhausted.attempt_count, profile.max_retries);
        assert_eq!(exhausted.error_kind, Some(ErrorKind::TransientTransport));

        // Backoff doubles: 1s then 2s
        let attempts = client.attempt_times("r1@example.com");
        assert_eq!(attempts.len(), 3);
        assert!(attempts[1] - attempts[0] >= Duration::from_millis(1_000));
        assert!(attempts[2] - attempts[1] >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honours_retry_after() {
        let client = Arc::new(ScriptedClient::new(|_email, attempt| {
            if attempt == 1 {
                Err(DeliveryError::new(ErrorKind::RateLimited, "421 try again in 10 seconds")
                    .with_retry_after(Some(Duration::from_secs(10))))
            } else {
                Ok(())
            }
        }));
        let (callback, _outcomes) = outcome_collector();

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(1), generic()), callback)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);

        let attempts = client.attempt_times("r1@example.com");
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_failure_short_circuits() {
        let client = Arc::new(ScriptedClient::new(|_email, _attempt| {
            Err(DeliveryError::new(ErrorKind::Authentication, "535 5.7.8 bad credentials"))
        }));
        let (callback, outcomes) = outcome_collector();
        let profile = generic().with_overrides(&DispatchOverrides {
            chunk_size: None,
            max_concurrent: Some(1),
        });

        let summary = scheduler(client.clone())
            .run_batch(request(jobs(8), profile), callback)
            .await
            .unwrap();

        assert_eq!(summary.failed, 8);
        assert_eq!(client.call_count(), 1);
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 8);
        assert!(outcomes
            .iter()
            .all(|o| o.error_kind == Some(ErrorKind::Authentication)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_attachments_fail_every_job() {
        let client = Arc::new(ScriptedClient::succeeding());
        let (callback, outcomes) = outcome_collector();
        let mut request = request(jobs(4), generic());
        request.attachments = AttachmentSet::Unavailable(DeliveryError::new(
            ErrorKind::Attachment,
            "Failed to download attachment proposta.pdf",
        ));

        let summary = scheduler(client.clone()).run_batch(request, callback).await.unwrap();

        assert_eq!(summary.failed, 4);
        assert_eq!(client.call_count(), 0);
        assert!(outcomes
            .lock()
            .unwrap()
            .iter()
            .all(|o| o.error_kind == Some(ErrorKind::Attachment) && o.attempt_count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preconditions_rejected_before_start() {
        let client = Arc::new(ScriptedClient::succeeding());
        let scheduler = DispatchScheduler::new(client.clone(), 5);

        let (callback, outcomes) = outcome_collector();
        let mut bad = request(jobs(3), generic());
        bad.credential = Arc::new(credential("  "));
        assert!(matches!(
            scheduler.run_batch(bad, callback.clone()).await,
            Err(DispatchError::Configuration(_))
        ));

        assert!(matches!(
            scheduler.run_batch(request(jobs(6), generic()), callback).await,
            Err(DispatchError::TooManyJobs { requested: 6, max: 5 })
        ));

        assert_eq!(client.call_count(), 0);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_run() {
        let cancel = CancellationToken::new();
        let client = Arc::new(
            ScriptedClient::succeeding()
                .with_delay(Duration::from_millis(200))
                .with_cancel_watch(cancel.clone()),
        );

        let outcomes = Arc::new(Mutex::new(Vec::<DeliveryOutcome>::new()));
        let callback: OutcomeCallback = {
            let outcomes = outcomes.clone();
            let cancel = cancel.clone();
            Arc::new(move |outcome: &DeliveryOutcome| {
                let mut outcomes = outcomes.lock().unwrap();
                outcomes.push(outcome.clone());
                if outcomes.len() == 20 {
                    cancel.cancel();
                }
            })
        };

        let mut request = request(jobs(100), generic());
        request.cancel = cancel.clone();
        let summary = scheduler(client.clone()).run_batch(request, callback).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.total, 100);
        assert_eq!(summary.succeeded + summary.failed, 100);
        assert!(summary.aborted > 0);
        assert!(summary.succeeded >= 20);

        let outcomes = outcomes.lock().unwrap();
        let indices: HashSet<usize> = outcomes.iter().map(|o| o.job_index).collect();
        assert_eq!(outcomes.len(), 100);
        assert_eq!(indices.len(), 100);
        assert_eq!(client.calls_after_cancel(), 0);
        assert!(outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Aborted)
            .all(|o| o.attempt_count == 0));
    }
}
