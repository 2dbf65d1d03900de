//! Bulk dispatch - Scheduling, throttling, progress and history of runs

mod engine;
mod history;
mod inputs;
mod job;
mod progress;
mod rate_limiter;
mod schedule_worker;
mod scheduler;

pub use engine::{DispatchEngine, DispatchOptions, RunHandle, RunRegistry, RunReport};
pub use history::{HistoryContext, HistoryRecorder, HistoryStats};
pub use inputs::{InputLoader, RecipientSelection, RunInputs};
pub use job::{BatchSummary, DeliveryOutcome, DispatchJob, OutcomeStatus};
pub use progress::{PerformanceTier, ProgressTracker, RunProgress};
pub use rate_limiter::{RateLimiter, RemainingQuota};
pub use schedule_worker::ScheduleWorker;
pub use scheduler::{AttachmentSet, BatchRequest, DispatchScheduler, OutcomeCallback};
