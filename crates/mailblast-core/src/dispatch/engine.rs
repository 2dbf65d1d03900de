//! Dispatch Engine - Starts runs and exposes their progress and results
//!
//! `start_batch` validates the request synchronously and hands back a
//! [`RunHandle`]; the run itself executes on a spawned task. Progress and
//! the final report are published through `watch` channels, so any number
//! of observers can follow a run without slowing it down.

use super::history::{HistoryContext, HistoryRecorder, HistoryStats};
use super::job::{BatchSummary, DeliveryOutcome, DispatchJob};
use super::progress::{ProgressTracker, RunProgress};
use super::scheduler::{AttachmentSet, BatchRequest, DispatchScheduler, OutcomeCallback};
use crate::attachments::{load_attachments, AttachmentSource};
use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use crate::provider::{DispatchOverrides, ProviderProfile};
use chrono::{DateTime, Utc};
use mailblast_common::config::DispatchConfig;
use mailblast_common::types::{Recipient, RunId, SmtpCredential, Template, UserId};
use mailblast_storage::{DeliveryHistoryRepository, DispatchMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Distinct failure messages kept in a report
const MAX_DISTINCT_ERRORS: usize = 10;

/// Finished runs older than this are dropped from the registry
const FINISHED_RUN_RETENTION_SECS: i64 = 3600;

/// Per-run options
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchOptions {
    #[serde(default)]
    pub mode: DispatchMode,
    #[serde(default)]
    pub overrides: DispatchOverrides,
}

/// Final result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub owner_id: UserId,
    pub mode: DispatchMode,
    pub summary: BatchSummary,
    pub history: HistoryStats,
    /// Deduplicated failure messages, first seen first
    pub distinct_errors: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// Handle on a started run; cheap to clone
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<RunInner>,
}

struct RunInner {
    id: RunId,
    owner_id: UserId,
    total: usize,
    cancel: CancellationToken,
    progress: watch::Receiver<RunProgress>,
    report: watch::Receiver<Option<Arc<RunReport>>>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.inner.id
    }

    pub fn owner_id(&self) -> UserId {
        self.inner.owner_id
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    /// Stop admitting jobs; in-flight sends finish, the rest end as aborted
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(run_id = %self.inner.id, "Cancelling dispatch run");
        }
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Latest published progress snapshot
    pub fn progress(&self) -> RunProgress {
        self.inner.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<RunProgress> {
        self.inner.progress.clone()
    }

    /// Final report, once the run is over
    pub fn report(&self) -> Option<Arc<RunReport>> {
        self.inner.report.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.report.borrow().is_some()
    }

    /// Wait for the run to finish.
    ///
    /// Returns `None` only if the run task died without producing a report.
    pub async fn wait(&self) -> Option<Arc<RunReport>> {
        let mut rx = self.inner.report.clone();
        let result = rx.wait_for(Option::is_some).await.map(|report| (*report).clone());
        match result {
            Ok(report) => report,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Call `callback` with every published snapshot, ending with the final one
    pub fn on_progress<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&RunProgress) + Send + 'static,
    {
        let mut rx = self.inner.progress.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                callback(&snapshot);
                if snapshot.finished || rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Call `callback` once with the final report
    pub fn on_complete<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Arc<RunReport>) + Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            match handle.wait().await {
                Some(report) => callback(report),
                None => warn!(run_id = %handle.id(), "Run ended without a report"),
            }
        })
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.inner.id)
            .field("total", &self.inner.total)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Runs known to this process, by id
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: RunHandle) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.insert(handle.id(), handle);
    }

    pub fn get(&self, id: RunId) -> Option<RunHandle> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.get(&id).cloned()
    }

    /// Runs that have not produced their report yet
    pub fn active(&self) -> Vec<RunHandle> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.values().filter(|h| !h.is_finished()).cloned().collect()
    }

    pub fn cancel_all(&self) -> usize {
        let active = self.active();
        for handle in &active {
            handle.cancel();
        }
        active.len()
    }

    /// Cancel every active run and wait up to `timeout` for each report.
    ///
    /// Returns the runs that were still unfinished when their wait timed out.
    pub async fn drain(&self, timeout: std::time::Duration) -> Vec<RunId> {
        let active = self.active();
        for handle in &active {
            handle.cancel();
        }

        let mut unfinished = Vec::new();
        for handle in active {
            if tokio::time::timeout(timeout, handle.wait()).await.is_err() {
                warn!(run_id = %handle.id(), "Run did not finish before shutdown");
                unfinished.push(handle.id());
            }
        }
        unfinished
    }

    /// Drop runs that finished before `cutoff`
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.retain(|_, handle| match handle.report() {
            Some(report) => report.finished_at >= cutoff,
            None => true,
        });
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatch engine
pub struct DispatchEngine {
    scheduler: Arc<DispatchScheduler>,
    attachments: Arc<dyn AttachmentSource>,
    history: Option<Arc<dyn DeliveryHistoryRepository>>,
    metrics: Option<Arc<DispatchMetrics>>,
    config: DispatchConfig,
    runs: RunRegistry,
}

impl DispatchEngine {
    /// Create a new dispatch engine
    pub fn new(
        scheduler: Arc<DispatchScheduler>,
        attachments: Arc<dyn AttachmentSource>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            scheduler,
            attachments,
            history: None,
            metrics: None,
            config,
            runs: RunRegistry::new(),
        }
    }

    /// Record one history row per outcome
    pub fn with_history(mut self, repo: Arc<dyn DeliveryHistoryRepository>) -> Self {
        self.history = Some(repo);
        self
    }

    /// Set the metrics sink
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Start a run.
    ///
    /// Configuration errors and oversized runs are rejected here, before
    /// any job exists. Must be called from within a Tokio runtime.
    pub fn start_batch(
        &self,
        owner_id: UserId,
        recipients: Vec<Recipient>,
        template: Template,
        credential: SmtpCredential,
        options: DispatchOptions,
    ) -> Result<RunHandle, DispatchError> {
        self.scheduler.validate(recipients.len(), &credential)?;

        let total = recipients.len();
        let profile = ProviderProfile::resolve(&credential.host).with_overrides(&options.overrides);
        let template = Arc::new(template);
        let jobs = DispatchJob::for_recipients(template.clone(), recipients);

        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(RunProgress::initial(total, started_at));
        let (report_tx, report_rx) = watch::channel(None);

        let handle = RunHandle {
            inner: Arc::new(RunInner {
                id: run_id,
                owner_id,
                total,
                cancel: cancel.clone(),
                progress: progress_rx,
                report: report_rx,
            }),
        };
        self.runs
            .prune_finished(started_at - chrono::Duration::seconds(FINISHED_RUN_RETENTION_SECS));
        self.runs.insert(handle.clone());

        if let Some(metrics) = &self.metrics {
            metrics.run_state("started");
        }

        info!(
            run_id = %run_id,
            owner_id = %owner_id,
            total,
            provider = profile.kind.as_str(),
            mode = %options.mode,
            "Dispatch run accepted"
        );

        let task = RunTask {
            run_id,
            owner_id,
            mode: options.mode,
            template,
            jobs,
            credential: Arc::new(credential),
            profile,
            cancel,
            started_at,
            scheduler: self.scheduler.clone(),
            attachments: self.attachments.clone(),
            history: self.history.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            progress_tx,
            report_tx,
        };
        tokio::spawn(task.execute());

        Ok(handle)
    }

    /// Cancel a run by id; returns false for unknown runs
    pub fn cancel(&self, run_id: RunId) -> bool {
        match self.runs.get(run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// Everything a spawned run owns
struct RunTask {
    run_id: RunId,
    owner_id: UserId,
    mode: DispatchMode,
    template: Arc<Template>,
    jobs: Vec<DispatchJob>,
    credential: Arc<SmtpCredential>,
    profile: ProviderProfile,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    scheduler: Arc<DispatchScheduler>,
    attachments: Arc<dyn AttachmentSource>,
    history: Option<Arc<dyn DeliveryHistoryRepository>>,
    metrics: Option<Arc<DispatchMetrics>>,
    config: DispatchConfig,
    progress_tx: watch::Sender<RunProgress>,
    report_tx: watch::Sender<Option<Arc<RunReport>>>,
}

impl RunTask {
    async fn execute(self) {
        let total = self.jobs.len();

        let attachments = match load_attachments(self.attachments.as_ref(), &self.template.attachments).await {
            Ok(list) => AttachmentSet::Ready(Arc::new(list)),
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "Attachments unavailable, every job will fail");
                AttachmentSet::Unavailable(e)
            }
        };

        let (history_tx, history_task) = match &self.history {
            Some(repo) => {
                let context = HistoryContext {
                    owner_id: self.owner_id,
                    run_id: self.run_id,
                    mode: self.mode,
                    sender_name: self.credential.from_name.clone(),
                    sender_email: self.credential.from_email.clone(),
                };
                let mut recorder = HistoryRecorder::new(repo.clone(), context, self.config.history_flush_size);
                let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryOutcome>();
                let task = tokio::spawn(async move {
                    while let Some(outcome) = rx.recv().await {
                        recorder.push(&outcome).await;
                    }
                    recorder.flush().await;
                    recorder.stats()
                });
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        let tracker = Arc::new(Mutex::new(ProgressTracker::new(
            total,
            &self.config,
            Instant::now(),
            self.started_at,
        )));
        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        let progress_tx = Arc::new(self.progress_tx);

        let on_outcome: OutcomeCallback = {
            let tracker = tracker.clone();
            let errors = errors.clone();
            let progress_tx = progress_tx.clone();
            Arc::new(move |outcome: &DeliveryOutcome| {
                if let Some(tx) = &history_tx {
                    if tx.send(outcome.clone()).is_err() {
                        error!(job_index = outcome.job_index, "History recorder stopped, outcome not recorded");
                    }
                }

                if let Some(message) = outcome.error_message.as_ref().filter(|_| !outcome.is_success()) {
                    let mut errors = errors.lock().unwrap_or_else(|e| e.into_inner());
                    if errors.len() < MAX_DISTINCT_ERRORS && !errors.contains(message) {
                        errors.push(message.clone());
                    }
                }

                let snapshot = tracker
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(outcome.is_success(), Instant::now());
                if let Some(snapshot) = snapshot {
                    progress_tx.send_replace(snapshot);
                }
            })
        };

        let request = BatchRequest {
            jobs: self.jobs,
            credential: self.credential,
            profile: self.profile,
            attachments,
            cancel: self.cancel.clone(),
        };

        let summary = match self.scheduler.run_batch(request, on_outcome).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Dispatch run rejected after start");
                let mut errors = errors.lock().unwrap_or_else(|e| e.into_inner());
                errors.push(e.to_string());
                BatchSummary::from_counts(total, 0, total, 0, 0, self.cancel.is_cancelled())
            }
        };

        let history = match history_task {
            Some(task) => task.await.unwrap_or_else(|e| {
                error!(run_id = %self.run_id, error = %e, "History recorder task failed");
                HistoryStats::default()
            }),
            None => HistoryStats::default(),
        };

        let final_progress = tracker.lock().unwrap_or_else(|e| e.into_inner()).finish();
        progress_tx.send_replace(final_progress);

        let state = if summary.cancelled { "cancelled" } else { "completed" };
        if let Some(metrics) = &self.metrics {
            metrics.run_state(state);
        }

        info!(
            run_id = %self.run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            aborted = summary.aborted,
            success_rate = summary.success_rate_percent,
            duration_ms = summary.total_duration_ms,
            history_failures = history.failed,
            "Dispatch run {}", state
        );

        let distinct_errors = std::mem::take(&mut *errors.lock().unwrap_or_else(|e| e.into_inner()));
        let report = RunReport {
            run_id: self.run_id,
            owner_id: self.owner_id,
            mode: self.mode,
            summary,
            history,
            distinct_errors,
            finished_at: Utc::now(),
        };
        self.report_tx.send_replace(Some(Arc::new(report)));
    }
}
