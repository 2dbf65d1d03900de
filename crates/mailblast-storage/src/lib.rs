//! MailBlast Storage - Table store and blob store abstraction
//!
//! This crate provides the repositories over the hosted Postgres tables
//! (`contacts`, `templates`, `settings`, `delivery_history`, `schedules`)
//! and the blob store used for attachments and signature images.

pub mod db;
pub mod file;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use file::{BlobStore, LocalBlobStore};
pub use models::*;
pub use repository::*;
