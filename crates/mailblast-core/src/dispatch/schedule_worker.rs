//! Schedule Worker - Starts deferred dispatches once they are due

use super::engine::{DispatchEngine, DispatchOptions, RunHandle};
use super::inputs::{InputLoader, RecipientSelection};
use anyhow::Result;
use chrono::Utc;
use mailblast_storage::{DispatchMode, Schedule, ScheduleRepository, ScheduleStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Schedule worker
pub struct ScheduleWorker {
    engine: Arc<DispatchEngine>,
    schedules: Arc<dyn ScheduleRepository>,
    inputs: Arc<InputLoader>,
    /// Schedules claimed per cycle
    batch_size: i64,
    /// Interval between processing cycles (seconds)
    poll_interval_secs: u64,
}

impl ScheduleWorker {
    /// Create a new schedule worker
    pub fn new(
        engine: Arc<DispatchEngine>,
        schedules: Arc<dyn ScheduleRepository>,
        inputs: Arc<InputLoader>,
    ) -> Self {
        Self {
            engine,
            schedules,
            inputs,
            batch_size: 10,
            poll_interval_secs: 30,
        }
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Run the worker until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));

        info!(
            "Schedule worker started (batch: {}, interval: {}s)",
            self.batch_size, self.poll_interval_secs
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.process_due().await {
                error!("Error processing due schedules: {}", e);
            }
        }

        info!("Schedule worker stopped");
    }

    /// Claim and start every due schedule.
    ///
    /// Returns one tracker per started run; each resolves once the schedule
    /// row holds the run's final state. Only a failed claim is an error;
    /// status writes that fail are logged and the remaining schedules still run.
    pub async fn process_due(&self) -> Result<Vec<JoinHandle<()>>> {
        let due = self.schedules.claim_due(Utc::now(), self.batch_size).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Processing {} due schedules", due.len());

        // Every claimed row is already `running`; each one must be settled here
        let mut trackers = Vec::with_capacity(due.len());
        for schedule in due {
            match self.start(&schedule).await {
                Ok(handle) => {
                    if let Err(e) = self
                        .schedules
                        .update_status(schedule.id, ScheduleStatus::Running, Some(handle.id()), None)
                        .await
                    {
                        error!(
                            schedule_id = %schedule.id,
                            run_id = %handle.id(),
                            error = %e,
                            "Failed to record run of scheduled dispatch"
                        );
                    }
                    trackers.push(self.track(schedule.id, handle));
                }
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Scheduled dispatch could not start");
                    if let Err(write_err) = self
                        .schedules
                        .update_status(schedule.id, ScheduleStatus::Failed, None, Some(&e.to_string()))
                        .await
                    {
                        error!(schedule_id = %schedule.id, error = %write_err, "Failed to mark schedule as failed");
                    }
                }
            }
        }

        Ok(trackers)
    }

    async fn start(&self, schedule: &Schedule) -> Result<RunHandle> {
        let selection = RecipientSelection::from_parts(schedule.contact_ids.clone(), schedule.tag.clone())?;
        let inputs = self
            .inputs
            .load(schedule.user_id, schedule.template_id, &selection)
            .await?;

        let handle = self.engine.start_batch(
            schedule.user_id,
            inputs.recipients,
            inputs.template,
            inputs.credential,
            DispatchOptions {
                mode: DispatchMode::Scheduled,
                ..Default::default()
            },
        )?;

        info!(
            schedule_id = %schedule.id,
            run_id = %handle.id(),
            total = handle.total(),
            "Scheduled dispatch started"
        );
        Ok(handle)
    }

    fn track(&self, schedule_id: uuid::Uuid, handle: RunHandle) -> JoinHandle<()> {
        let schedules = self.schedules.clone();
        tokio::spawn(async move {
            let (status, error) = match handle.wait().await {
                Some(report) if report.summary.cancelled => (ScheduleStatus::Cancelled, None),
                Some(_) => (ScheduleStatus::Completed, None),
                None => (
                    ScheduleStatus::Failed,
                    Some("Run ended without a report".to_string()),
                ),
            };

            if let Err(e) = schedules
                .update_status(schedule_id, status, Some(handle.id()), error.as_deref())
                .await
            {
                error!(schedule_id = %schedule_id, error = %e, "Failed to update schedule status");
            }
        })
    }
}
