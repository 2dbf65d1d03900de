//! API request handlers

pub mod dispatch;
pub mod health;
pub mod history;
pub mod metrics;
pub mod preview;
pub mod schedules;

pub use health::*;
