//! Request admission guard
//!
//! One call per request, before any handler logic runs:
//!
//! 1. Resolve the caller identity from trusted proxy headers
//! 2. Count the request against the route bucket's [`Policy`] (429 on denial)
//! 3. Compare the declared `Content-Length` with the body limit (413 on overflow)
//!
//! Rejections carry a generic message only. If the counter store fails the
//! request is admitted (fail-open) and the fault is logged and counted.

pub mod middleware;

use crate::identity::ClientIdentifier;
use crate::rate_limit::{GuardResult, Policy, PolicyPreset, RateLimiter};
use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub use middleware::{add_rate_limit_headers, guard_middleware, ClientIdentity, GuardState};

/// Default maximum declared body size in bytes
pub const DEFAULT_MAX_BODY_BYTES: u64 = 100_000;

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Request body too large.";

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Per-route guard settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Route bucket partitioning the counters
    pub bucket: String,
    /// Policy override (the guard's default policy applies otherwise)
    pub policy: Option<Policy>,
    /// Body size override in bytes
    pub max_body_bytes: Option<u64>,
}

impl GuardConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            policy: None,
            max_body_bytes: None,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_preset(self, preset: PolicyPreset) -> Self {
        self.with_policy(preset.policy())
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = Some(max_body_bytes);
        self
    }
}

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    /// Quota used up; retryable after `retry_after_secs`
    RateLimited {
        limit: u32,
        retry_after_secs: u64,
        reset_at_secs: u64,
    },
    /// Declared body exceeds the limit; not retryable as-is
    PayloadTooLarge { declared: u64, max: u64 },
}

/// A ready-made rejection response
#[derive(Debug, Clone)]
pub struct Rejection {
    pub kind: RejectionKind,
}

impl Rejection {
    fn rate_limited(result: &GuardResult) -> Self {
        Self {
            kind: RejectionKind::RateLimited {
                limit: result.limit,
                retry_after_secs: result.retry_after_secs,
                reset_at_secs: result.reset_at_secs(),
            },
        }
    }

    fn payload_too_large(declared: u64, max: u64) -> Self {
        Self {
            kind: RejectionKind::PayloadTooLarge { declared, max },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            RejectionKind::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RejectionKind::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Generic user-facing message
    pub fn message(&self) -> &'static str {
        match self.kind {
            RejectionKind::RateLimited { .. } => RATE_LIMITED_MESSAGE,
            RejectionKind::PayloadTooLarge { .. } => PAYLOAD_TOO_LARGE_MESSAGE,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let RejectionKind::RateLimited {
            limit,
            retry_after_secs,
            reset_at_secs,
        } = self.kind
        {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at_secs));
        }

        headers
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message() }));
        (self.status(), self.headers(), body).into_response()
    }
}

/// Guard verdict for one request
#[derive(Debug, Clone)]
pub enum Admission {
    /// Proceed. `result` is `None` when the counter store failed and the request was let through.
    Pass {
        identifier: String,
        result: Option<GuardResult>,
    },
    Reject(Rejection),
}

impl Admission {
    pub fn is_pass(&self) -> bool {
        matches!(self, Admission::Pass { .. })
    }

    /// Resolved identifier of an admitted request
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Admission::Pass { identifier, .. } => Some(identifier),
            Admission::Reject(_) => None,
        }
    }
}

/// Composes identity extraction, rate limiting and the body-size check
#[derive(Debug, Clone)]
pub struct RequestGuard {
    limiter: Arc<RateLimiter>,
    identifier: ClientIdentifier,
    default_policy: Policy,
    default_max_body_bytes: u64,
}

impl RequestGuard {
    /// Create a guard with the general preset and the default body limit
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            identifier: ClientIdentifier::default(),
            default_policy: PolicyPreset::GENERAL,
            default_max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_identifier(mut self, identifier: ClientIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Replace the default policy. An invalid policy is ignored with a warning.
    pub fn with_default_policy(mut self, policy: Policy) -> Self {
        match policy.validate() {
            Ok(()) => self.default_policy = policy,
            Err(e) => warn!(error = %e, "Ignoring invalid default policy"),
        }
        self
    }

    pub fn with_default_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.default_max_body_bytes = max_body_bytes;
        self
    }

    /// Judge a request from its headers and declared body length
    pub fn check(
        &self,
        headers: &HeaderMap,
        content_length: Option<u64>,
        config: &GuardConfig,
    ) -> Admission {
        let identifier = self.identifier.extract(headers);
        let policy = match config.policy {
            Some(policy) if policy.validate().is_err() => {
                warn!(
                    bucket = %config.bucket,
                    max_requests = policy.max_requests,
                    window_secs = policy.window_secs,
                    "Invalid route policy, using default"
                );
                self.default_policy
            }
            Some(policy) => policy,
            None => self.default_policy,
        };

        let result = match self
            .limiter
            .check_and_consume(&identifier, &config.bucket, &policy)
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(
                    bucket = %config.bucket,
                    error = %e,
                    "Rate limiter failed, admitting request"
                );
                counter!("admission_guard_errors_total").increment(1);
                None
            }
        };

        if let Some(result) = result.as_ref().filter(|result| !result.allowed) {
            counter!("admission_requests_total", "outcome" => "rate_limited").increment(1);
            counter!("admission_rate_limited_total", "bucket" => config.bucket.clone())
                .increment(1);
            return Admission::Reject(Rejection::rate_limited(result));
        }

        let max_body_bytes = config.max_body_bytes.unwrap_or(self.default_max_body_bytes);
        if let Some(declared) = content_length.filter(|declared| *declared > max_body_bytes) {
            warn!(
                bucket = %config.bucket,
                declared,
                max = max_body_bytes,
                "Declared request body too large"
            );
            counter!("admission_requests_total", "outcome" => "payload_too_large").increment(1);
            return Admission::Reject(Rejection::payload_too_large(declared, max_body_bytes));
        }

        debug!(bucket = %config.bucket, identifier = %identifier, "Request admitted");
        counter!("admission_requests_total", "outcome" => "pass").increment(1);
        Admission::Pass { identifier, result }
    }

    /// Judge an HTTP request, reading its declared `Content-Length`
    pub fn check_request<B>(&self, request: &Request<B>, config: &GuardConfig) -> Admission {
        let headers = request.headers();
        self.check(headers, declared_content_length(headers), config)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Parse `Content-Length`; a malformed value counts as absent
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
