//! MailBlast API - REST API server
//!
//! This crate exposes the dispatch engine over HTTP: starting, following
//! and cancelling runs, template previews, delivery history, schedules
//! and Prometheus metrics.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;

pub use auth::{AppState, HttpIdentityProvider, IdentityProvider};
pub use routes::create_router;
