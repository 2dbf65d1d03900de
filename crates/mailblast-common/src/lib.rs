//! MailBlast Common - Shared types and utilities
//!
//! This crate provides the domain types, configuration, and error
//! definitions shared by the storage layer, the dispatch engine and the API.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
