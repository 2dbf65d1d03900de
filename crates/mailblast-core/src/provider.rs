//! Provider Profile Resolver
//!
//! Maps an SMTP host to the pacing parameters used for a run. Consumer
//! mailbox providers get conservative values; unknown hosts (usually a
//! company relay or a transactional provider) get looser ones.

use serde::{Deserialize, Serialize};

/// Known SMTP provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
    Yahoo,
    Generic,
}

impl ProviderKind {
    /// Classify a host by case-insensitive substring match
    pub fn from_host(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if host.contains("gmail") {
            ProviderKind::Gmail
        } else if host.contains("outlook") || host.contains("live") {
            ProviderKind::Outlook
        } else if host.contains("yahoo") {
            ProviderKind::Yahoo
        } else {
            ProviderKind::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Outlook => "outlook",
            ProviderKind::Yahoo => "yahoo",
            ProviderKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pacing parameters for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    /// Simultaneous SMTP sends
    pub max_concurrent: usize,
    /// Send attempts allowed in any rolling minute
    pub rate_per_minute: u32,
    /// Send attempts allowed in any rolling second
    pub burst_limit: u32,
    /// Pause a worker takes after each attempt
    pub inter_send_delay_ms: u64,
    pub chunk_size: usize,
    pub inter_chunk_delay_ms: u64,
    /// Total attempt budget per job
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff
    pub retry_backoff_ms: u64,
}

impl ProviderProfile {
    /// Resolve the profile for an SMTP host
    pub fn resolve(host: &str) -> Self {
        Self::for_kind(ProviderKind::from_host(host))
    }

    /// Built-in profile for a provider family
    pub fn for_kind(kind: ProviderKind) -> Self {
        let profile = match kind {
            ProviderKind::Gmail => Self {
                kind,
                max_concurrent: 3,
                rate_per_minute: 20,
                burst_limit: 2,
                inter_send_delay_ms: 1_000,
                chunk_size: 10,
                inter_chunk_delay_ms: 2_000,
                max_retries: 3,
                retry_backoff_ms: 2_000,
            },
            ProviderKind::Outlook => Self {
                kind,
                max_concurrent: 2,
                rate_per_minute: 30,
                burst_limit: 2,
                inter_send_delay_ms: 1_500,
                chunk_size: 10,
                inter_chunk_delay_ms: 3_000,
                max_retries: 3,
                retry_backoff_ms: 3_000,
            },
            ProviderKind::Yahoo => Self {
                kind,
                max_concurrent: 2,
                rate_per_minute: 20,
                burst_limit: 1,
                inter_send_delay_ms: 2_000,
                chunk_size: 5,
                inter_chunk_delay_ms: 3_000,
                max_retries: 3,
                retry_backoff_ms: 3_000,
            },
            ProviderKind::Generic => Self {
                kind,
                max_concurrent: 10,
                rate_per_minute: 600,
                burst_limit: 20,
                inter_send_delay_ms: 100,
                chunk_size: 50,
                inter_chunk_delay_ms: 500,
                max_retries: 3,
                retry_backoff_ms: 1_000,
            },
        };
        profile.normalized()
    }

    /// Apply caller overrides on top of the resolved values
    pub fn with_overrides(mut self, overrides: &DispatchOverrides) -> Self {
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(max_concurrent) = overrides.max_concurrent {
            self.max_concurrent = max_concurrent;
        }
        self.normalized()
    }

    /// Clamp every count to at least one so a run can never stall
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self.rate_per_minute = self.rate_per_minute.max(1);
        self.burst_limit = self.burst_limit.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self.max_retries = self.max_retries.max(1);
        self
    }
}

/// Per-run adjustments to the resolved profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOverrides {
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_host() {
        assert_eq!(ProviderProfile::resolve("smtp.gmail.com").kind, ProviderKind::Gmail);
        assert_eq!(ProviderProfile::resolve("SMTP.GMAIL.COM").kind, ProviderKind::Gmail);
        assert_eq!(ProviderProfile::resolve("smtp-mail.outlook.com").kind, ProviderKind::Outlook);
        assert_eq!(ProviderProfile::resolve("smtp.live.com").kind, ProviderKind::Outlook);
        assert_eq!(ProviderProfile::resolve("smtp.mail.yahoo.com").kind, ProviderKind::Yahoo);
        assert_eq!(ProviderProfile::resolve("smtp.example.com").kind, ProviderKind::Generic);
        assert_eq!(ProviderProfile::resolve("").kind, ProviderKind::Generic);
    }

    #[test]
    fn test_consumer_profiles_are_stricter() {
        let gmail = ProviderProfile::resolve("smtp.gmail.com");
        let generic = ProviderProfile::resolve("smtp.example.com");

        assert!(gmail.max_concurrent < generic.max_concurrent);
        assert!(gmail.rate_per_minute < generic.rate_per_minute);
        assert!(gmail.inter_send_delay_ms > generic.inter_send_delay_ms);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        assert_eq!(
            ProviderProfile::resolve("smtp.office365.com"),
            ProviderProfile::resolve("smtp.office365.com")
        );
    }

    #[test]
    fn test_overrides_keep_floors() {
        let profile = ProviderProfile::resolve("smtp.gmail.com").with_overrides(&DispatchOverrides {
            chunk_size: Some(0),
            max_concurrent: Some(0),
        });
        assert_eq!(profile.chunk_size, 1);
        assert_eq!(profile.max_concurrent, 1);

        let profile = ProviderProfile::resolve("smtp.gmail.com").with_overrides(&DispatchOverrides {
            chunk_size: Some(25),
            max_concurrent: None,
        });
        assert_eq!(profile.chunk_size, 25);
        assert_eq!(profile.max_concurrent, 3);
    }
}
