//! Classification of SMTP replies into delivery error kinds

use crate::error::ErrorKind;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

fn retry_after_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:retry|try again)\D{0,20}?(\d+)\s*(s|sec|secs|seconds?|m|min|mins|minutes?)\b",
        )
        .expect("valid retry-after pattern")
    })
}

/// Map an SMTP reply code and its text to an error kind.
///
/// `code` is `None` when the failure happened before a reply was read
/// (connection refused, TLS failure, timeout).
pub fn classify_reply(code: Option<u16>, text: &str) -> ErrorKind {
    let lower = text.to_ascii_lowercase();
    let throttled = ["rate", "limit", "too many", "throttl", "slow down"]
        .iter()
        .any(|needle| lower.contains(needle));

    match code {
        Some(421) => ErrorKind::RateLimited,
        Some(450..=452) if throttled => ErrorKind::RateLimited,
        Some(400..=499) => ErrorKind::TransientTransport,
        Some(530) | Some(534) | Some(535) | Some(538) => ErrorKind::Authentication,
        Some(550..=559) if throttled && lower.contains("try again") => ErrorKind::RateLimited,
        Some(500..=599) => ErrorKind::PermanentRejection,
        Some(_) => ErrorKind::TransientTransport,
        None if lower.contains("authentication") || lower.contains("credentials") => {
            ErrorKind::Authentication
        }
        None => ErrorKind::TransientTransport,
    }
}

/// Extract a "retry after" hint such as `try again in 30 seconds`
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    let caps = retry_after_pattern().captures(text)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();

    if unit.starts_with('m') {
        Some(Duration::from_secs(amount.saturating_mul(60)))
    } else {
        Some(Duration::from_secs(amount))
    }
}
