use crate::error::{AdmissionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rate limit policy: at most `max_requests` per `window_secs`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Policy {
    /// Maximum number of requests allowed in one window
    pub max_requests: u32,
    /// Window length (in seconds)
    pub window_secs: u64,
}

impl Policy {
    /// Create a validated policy
    pub fn new(max_requests: u32, window_secs: u64) -> Result<Self> {
        let policy = Self {
            max_requests,
            window_secs,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Both fields must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(AdmissionError::InvalidPolicy(
                "max_requests must be > 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(AdmissionError::InvalidPolicy(
                "window_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }
}

/// Named policy presets, one per route category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyPreset {
    /// Expensive upstream work (AI calls, report generation): tight quota, short window
    Expensive,
    /// Everyday endpoints
    General,
    /// Login, signup, password reset
    Auth,
    /// Outbound email: tight quota, long window
    EmailSend,
}

impl PolicyPreset {
    pub const EXPENSIVE: Policy = Policy {
        max_requests: 10,
        window_secs: 60,
    };
    pub const GENERAL: Policy = Policy {
        max_requests: 60,
        window_secs: 60,
    };
    pub const AUTH: Policy = Policy {
        max_requests: 5,
        window_secs: 60,
    };
    pub const EMAIL_SEND: Policy = Policy {
        max_requests: 3,
        window_secs: 3600,
    };

    pub const ALL: [PolicyPreset; 4] = [
        PolicyPreset::Expensive,
        PolicyPreset::General,
        PolicyPreset::Auth,
        PolicyPreset::EmailSend,
    ];

    /// The `(max_requests, window_secs)` pair bound to this label
    pub fn policy(&self) -> Policy {
        match self {
            PolicyPreset::Expensive => Self::EXPENSIVE,
            PolicyPreset::General => Self::GENERAL,
            PolicyPreset::Auth => Self::AUTH,
            PolicyPreset::EmailSend => Self::EMAIL_SEND,
        }
    }

    /// Configuration name of the preset
    pub fn name(&self) -> &'static str {
        match self {
            PolicyPreset::Expensive => "expensive",
            PolicyPreset::General => "general",
            PolicyPreset::Auth => "auth",
            PolicyPreset::EmailSend => "email-send",
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyPreset {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyPreset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AdmissionError::UnknownPreset(s.to_string()))
    }
}

impl From<PolicyPreset> for Policy {
    fn from(preset: PolicyPreset) -> Self {
        preset.policy()
    }
}

/// Per-key counter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests counted in the current window
    pub count: u32,
    /// When the current window closes (epoch milliseconds)
    pub window_reset_at: u64,
}

impl CounterEntry {
    /// Open a new window at `now_ms` with one request counted
    pub fn open(policy: &Policy, now_ms: u64) -> Self {
        Self {
            count: 1,
            window_reset_at: now_ms.saturating_add(policy.window_ms()),
        }
    }

    /// A window that has closed must not be counted against again
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.window_reset_at < now_ms
    }
}

/// Outcome of a store hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    /// The entry after the hit
    pub entry: CounterEntry,
    /// Whether this hit was counted (false means the quota was already used up)
    pub counted: bool,
}

/// Rate limit decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Policy limit
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// When the window resets (epoch milliseconds)
    pub reset_at: u64,
    /// Seconds the caller should wait (0 when allowed)
    pub retry_after_secs: u64,
}

impl GuardResult {
    /// Create an allowed result
    pub fn allowed(limit: u32, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after_secs: 0,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, reset_at: u64, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after_secs,
        }
    }

    /// Reset timestamp in whole epoch seconds, as sent in `X-RateLimit-Reset`
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at.div_ceil(1000)
    }
}

/// Compose the counter key for a bucket and identifier
pub fn counter_key(bucket: &str, identifier: &str) -> String {
    format!("{}:{}", bucket, identifier)
}
