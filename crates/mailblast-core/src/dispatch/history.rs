//! History Recorder - One `delivery_history` row per outcome
//!
//! Write failures are logged and counted; they never change the run's own
//! success accounting.

use super::job::{DeliveryOutcome, OutcomeStatus};
use mailblast_common::types::{RunId, UserId};
use mailblast_storage::{DeliveryHistoryRepository, DeliveryStatus, DispatchMode, NewDeliveryHistory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Fields shared by every row of a run
#[derive(Debug, Clone)]
pub struct HistoryContext {
    pub owner_id: UserId,
    pub run_id: RunId,
    pub mode: DispatchMode,
    pub sender_name: String,
    pub sender_email: String,
}

/// Write counters of a recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub written: u64,
    /// Rows that could not be persisted
    pub failed: u64,
}

/// History recorder for one run
pub struct HistoryRecorder {
    repo: Arc<dyn DeliveryHistoryRepository>,
    context: HistoryContext,
    buffer: Vec<NewDeliveryHistory>,
    flush_size: usize,
    stats: HistoryStats,
}

impl HistoryRecorder {
    pub fn new(repo: Arc<dyn DeliveryHistoryRepository>, context: HistoryContext, flush_size: usize) -> Self {
        let flush_size = flush_size.max(1);
        Self {
            repo,
            context,
            buffer: Vec::with_capacity(flush_size),
            flush_size,
            stats: HistoryStats::default(),
        }
    }

    /// Map an outcome to its history row
    pub fn row(&self, outcome: &DeliveryOutcome) -> NewDeliveryHistory {
        let status = match outcome.status {
            OutcomeStatus::Succeeded => DeliveryStatus::Delivered,
            OutcomeStatus::Failed | OutcomeStatus::Aborted => DeliveryStatus::Error,
        };

        NewDeliveryHistory {
            user_id: self.context.owner_id,
            run_id: Some(self.context.run_id),
            template_id: Some(outcome.template_id),
            recipient_id: Some(outcome.recipient_id),
            sender_name: self.context.sender_name.clone(),
            sender_email: self.context.sender_email.clone(),
            recipient_name: outcome.recipient_name.clone(),
            recipient_email: outcome.recipient_email.clone(),
            status,
            error_message: outcome.error_message.clone(),
            dispatch_mode: self.context.mode,
            attempt_count: i32::try_from(outcome.attempt_count).unwrap_or(i32::MAX),
            provider_message_id: outcome.provider_message_id.clone(),
            sent_at: outcome.finished_at,
        }
    }

    /// Write a set of outcomes right away
    pub async fn record(&mut self, outcomes: &[DeliveryOutcome]) {
        let rows: Vec<NewDeliveryHistory> = outcomes.iter().map(|o| self.row(o)).collect();
        self.write(rows).await;
    }

    /// Buffer one outcome, writing when the buffer is full
    pub async fn push(&mut self, outcome: &DeliveryOutcome) {
        let row = self.row(outcome);
        self.buffer.push(row);
        if self.buffer.len() >= self.flush_size {
            self.flush().await;
        }
    }

    /// Write everything buffered so far
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let rows = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.flush_size));
        self.write(rows).await;
    }

    async fn write(&mut self, rows: Vec<NewDeliveryHistory>) {
        if rows.is_empty() {
            return;
        }

        match self.repo.insert_batch(&rows).await {
            Ok(written) => {
                self.stats.written += written;
                debug!(run_id = %self.context.run_id, rows = written, "Recorded delivery history");
            }
            Err(e) => {
                self.stats.failed += rows.len() as u64;
                error!(
                    run_id = %self.context.run_id,
                    rows = rows.len(),
                    error = %e,
                    "Failed to record delivery history"
                );
            }
        }
    }

    pub fn stats(&self) -> HistoryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeliveryError, ErrorKind};
    use crate::dispatch::job::DispatchJob;
    use chrono::Utc;
    use mailblast_common::types::{Recipient, Template};
    use mailblast_storage::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn job(email: &str) -> DispatchJob {
        DispatchJob {
            recipient: Arc::new(Recipient::new(Uuid::new_v4(), "Ana", email)),
            template: Arc::new(Template {
                id: Uuid::new_v4(),
                name: "Oferta".to_string(),
                subject: None,
                body: "Olá".to_string(),
                signature: None,
                signature_image_url: None,
                attachments: Vec::new(),
            }),
        }
    }

    fn context(owner_id: UserId) -> HistoryContext {
        HistoryContext {
            owner_id,
            run_id: Uuid::now_v7(),
            mode: DispatchMode::coerce("lote"),
            sender_name: "Acme".to_string(),
            sender_email: "news@acme.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rows_follow_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let mut recorder = HistoryRecorder::new(store.clone(), context(owner), 2);

        let ok = DeliveryOutcome::succeeded(0, &job("a@example.com"), "<m1@acme.com>".to_string(), 1, Utc::now());
        let err = DeliveryError::new(ErrorKind::PermanentRejection, "550 mailbox unavailable");
        let failed = DeliveryOutcome::failed(1, &job("b@example.com"), &err, 1, Utc::now());
        let aborted = DeliveryOutcome::aborted(2, &job("c@example.com"), None, 0, Utc::now());

        recorder.push(&ok).await;
        assert!(store.history().await.is_empty());
        recorder.push(&failed).await;
        assert_eq!(store.history().await.len(), 2);
        recorder.push(&aborted).await;
        recorder.flush().await;

        let rows = store.history().await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, "delivered");
        assert_eq!(rows[0].provider_message_id.as_deref(), Some("<m1@acme.com>"));
        assert_eq!(rows[0].dispatch_mode, "batch");
        assert_eq!(rows[1].status, "error");
        assert_eq!(rows[1].error_message.as_deref(), Some("550 mailbox unavailable"));
        assert_eq!(rows[2].status, "error");
        assert!(rows.iter().all(|r| r.user_id == owner));
        assert_eq!(recorder.stats(), HistoryStats { written: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_write_failures_are_counted() {
        let store = Arc::new(MemoryStore::new());
        store.set_history_unavailable(true);
        let mut recorder = HistoryRecorder::new(store.clone(), context(Uuid::new_v4()), 10);

        let outcome = DeliveryOutcome::succeeded(0, &job("a@example.com"), "<m@acme.com>".to_string(), 1, Utc::now());
        recorder.record(&[outcome.clone(), outcome]).await;

        assert_eq!(recorder.stats(), HistoryStats { written: 0, failed: 2 });
        assert!(store.history().await.is_empty());
    }
}
