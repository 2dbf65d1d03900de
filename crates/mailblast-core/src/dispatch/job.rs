//! Jobs, outcomes and run summaries

use crate::error::{DeliveryError, ErrorKind};
use chrono::{DateTime, Utc};
use mailblast_common::types::{Recipient, RecipientId, Template, TemplateId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One (recipient, template) send unit
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub recipient: Arc<Recipient>,
    pub template: Arc<Template>,
}

impl DispatchJob {
    /// One job per recipient, all sharing the same template
    pub fn for_recipients(template: Arc<Template>, recipients: Vec<Recipient>) -> Vec<DispatchJob> {
        recipients
            .into_iter()
            .map(|recipient| DispatchJob {
                recipient: Arc::new(recipient),
                template: template.clone(),
            })
            .collect()
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// Never completed because the run was cancelled
    Aborted,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Aborted => "aborted",
        }
    }
}

/// Terminal record of one job.
///
/// `job_index` is the position of the job in the submitted list; outcomes
/// arrive in completion order, so consumers correlate by index or recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub job_index: usize,
    pub recipient_id: RecipientId,
    pub recipient_name: String,
    pub recipient_email: String,
    pub template_id: TemplateId,
    pub status: OutcomeStatus,
    pub provider_message_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    fn base(job_index: usize, job: &DispatchJob, status: OutcomeStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            job_index,
            recipient_id: job.recipient.id,
            recipient_name: job.recipient.name.clone(),
            recipient_email: job.recipient.email.clone(),
            template_id: job.template.id,
            status,
            provider_message_id: None,
            error_kind: None,
            error_message: None,
            attempt_count: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(
        job_index: usize,
        job: &DispatchJob,
        message_id: String,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_message_id: Some(message_id),
            attempt_count,
            ..Self::base(job_index, job, OutcomeStatus::Succeeded, started_at)
        }
    }

    pub fn failed(
        job_index: usize,
        job: &DispatchJob,
        error: &DeliveryError,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            error_kind: Some(error.kind),
            error_message: Some(error.message.clone()),
            attempt_count,
            ..Self::base(job_index, job, OutcomeStatus::Failed, started_at)
        }
    }

    /// Job stopped by cancellation, keeping the last error seen if it was retrying
    pub fn aborted(
        job_index: usize,
        job: &DispatchJob,
        last_error: Option<&DeliveryError>,
        attempt_count: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            error_kind: last_error.map(|e| e.kind),
            error_message: Some(match last_error {
                Some(e) => format!("Dispatch cancelled while retrying: {}", e.message),
                None => "Dispatch cancelled before the message was sent".to_string(),
            }),
            attempt_count,
            ..Self::base(job_index, job, OutcomeStatus::Aborted, started_at)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Every job that did not succeed, aborted ones included
    pub failed: usize,
    /// Subset of `failed` that never completed because of cancellation
    pub aborted: usize,
    pub success_rate_percent: f64,
    pub total_duration_ms: u64,
    pub avg_throughput_per_sec: f64,
    pub cancelled: bool,
}

impl BatchSummary {
    /// Summary of a run with no jobs
    pub fn empty() -> Self {
        Self::from_counts(0, 0, 0, 0, 0, false)
    }

    pub fn from_counts(
        total: usize,
        succeeded: usize,
        failed: usize,
        aborted: usize,
        total_duration_ms: u64,
        cancelled: bool,
    ) -> Self {
        let success_rate_percent = if total == 0 {
            0.0
        } else {
            round2(succeeded as f64 * 100.0 / total as f64)
        };
        let completed = succeeded + failed - aborted;
        let avg_throughput_per_sec = if total_duration_ms == 0 {
            0.0
        } else {
            round2(completed as f64 * 1000.0 / total_duration_ms as f64)
        };

        Self {
            total,
            succeeded,
            failed,
            aborted,
            success_rate_percent,
            total_duration_ms,
            avg_throughput_per_sec,
            cancelled,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_rates() {
        let summary = BatchSummary::from_counts(5, 3, 2, 0, 2_000, false);
        assert_eq!(summary.success_rate_percent, 60.0);
        assert_eq!(summary.avg_throughput_per_sec, 2.5);

        let summary = BatchSummary::from_counts(3, 1, 2, 0, 0, false);
        assert_eq!(summary.success_rate_percent, 33.33);
        assert_eq!(summary.avg_throughput_per_sec, 0.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = BatchSummary::empty();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.success_rate_percent, 0.0);
    }
}
