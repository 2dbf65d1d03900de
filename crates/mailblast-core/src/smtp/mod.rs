//! SMTP Delivery Client module

mod client;
mod message;
mod reply;

pub use client::{DeliveryClient, LettreDeliveryClient, SentReceipt};
pub use message::{build_message, generate_message_id, infer_content_type};
pub use reply::{classify_reply, parse_retry_after};
