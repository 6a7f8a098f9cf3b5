//! Caller identification from trusted proxy headers.
//!
//! Threat model: these headers are only meaningful when the service sits
//! behind a reverse proxy or CDN that strips or overwrites client-supplied
//! copies of them. Without that, any caller can pick its own identity and
//! dodge per-caller quotas.

use crate::error::{AdmissionError, Result};
use axum::http::{HeaderMap, HeaderName};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Identifier used when no trusted header carries a usable value.
///
/// All such requests share one quota bucket.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const CDN_CONNECTING_IP: &str = "cf-connecting-ip";
pub const REAL_IP: &str = "x-real-ip";

/// Identity extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Headers consulted in precedence order
    #[serde(default = "default_trusted_headers")]
    pub trusted_headers: Vec<String>,
}

fn default_trusted_headers() -> Vec<String> {
    vec![
        FORWARDED_FOR.to_string(),
        CDN_CONNECTING_IP.to_string(),
        REAL_IP.to_string(),
    ]
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trusted_headers: default_trusted_headers(),
        }
    }
}

static DEFAULT_IDENTIFIER: LazyLock<ClientIdentifier> = LazyLock::new(ClientIdentifier::default);

/// Derives a best-effort caller identity from request headers.
///
/// Clones share the fallback flag, so the shared-bucket warning is logged
/// once per identifier and its clones.
#[derive(Debug, Clone)]
pub struct ClientIdentifier {
    headers: Vec<HeaderName>,
    fallback_seen: Arc<AtomicBool>,
}

impl Default for ClientIdentifier {
    fn default() -> Self {
        Self::with_headers(vec![
            HeaderName::from_static(FORWARDED_FOR),
            HeaderName::from_static(CDN_CONNECTING_IP),
            HeaderName::from_static(REAL_IP),
        ])
    }
}

impl ClientIdentifier {
    /// Build an identifier from configuration
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        if config.trusted_headers.is_empty() {
            return Err(AdmissionError::Config(
                "identity.trusted_headers cannot be empty".to_string(),
            ));
        }

        let headers = config
            .trusted_headers
            .iter()
            .map(|name| {
                HeaderName::from_str(name).map_err(|e| {
                    AdmissionError::Config(format!("Invalid trusted header '{}': {}", name, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::with_headers(headers))
    }

    fn with_headers(headers: Vec<HeaderName>) -> Self {
        Self {
            headers,
            fallback_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether any request so far fell back to [`UNKNOWN_IDENTIFIER`]
    pub fn has_fallen_back(&self) -> bool {
        self.fallback_seen.load(Ordering::Relaxed)
    }

    /// Extract the caller identity, falling back to [`UNKNOWN_IDENTIFIER`]
    pub fn extract(&self, headers: &HeaderMap) -> String {
        for name in &self.headers {
            // Proxy chains append, so the first hop is the original client
            let candidate = headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());

            if let Some(identifier) = candidate {
                return identifier.to_string();
            }
        }

        counter!("admission_unknown_identity_total").increment(1);
        if !self.fallback_seen.swap(true, Ordering::Relaxed) {
            warn!(
                headers = ?self.headers,
                "No trusted identity header present; such callers share one quota. \
                 Check that the reverse proxy sets one of these headers"
            );
        } else {
            debug!("No trusted identity header present, using shared unknown bucket");
        }
        UNKNOWN_IDENTIFIER.to_string()
    }
}

/// Extract the caller identity using the default header precedence
pub fn extract_identifier(headers: &HeaderMap) -> String {
    DEFAULT_IDENTIFIER.extract(headers)
}
