//! MailBlast Core - Bulk email dispatch engine
//!
//! This crate turns a contact list and a template into individually
//! rendered SMTP deliveries through a single sender credential, with
//! provider-aware throttling, retries, live progress and a persisted
//! delivery history.

pub mod attachments;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod smtp;
pub mod template;

pub use attachments::{AttachmentSource, LoadedAttachment, StorageAttachmentSource};
pub use dispatch::{
    BatchSummary, DeliveryOutcome, DispatchEngine, DispatchJob, DispatchOptions,
    DispatchScheduler, InputLoader, OutcomeStatus, RecipientSelection, RunHandle, RunProgress,
    RunRegistry, RunReport, ScheduleWorker,
};
pub use error::{DeliveryError, DispatchError, ErrorKind};
pub use metrics::DispatchMetrics;
pub use provider::{DispatchOverrides, ProviderKind, ProviderProfile};
pub use smtp::{DeliveryClient, LettreDeliveryClient, SentReceipt};
pub use template::{RenderedMessage, TemplateRenderer};
