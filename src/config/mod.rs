use crate::error::{AdmissionError, Result};
use crate::guard::{GuardConfig, DEFAULT_MAX_BODY_BYTES};
use crate::identity::IdentityConfig;
use crate::rate_limit::{Policy, PolicyPreset};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Unguarded liveness endpoint
pub const HEALTH_PATH: &str = "/health";

/// Main admission service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Guard-wide limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Trusted identity headers
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Overrides for named presets (e.g. `auth: { max_requests: 3, window_secs: 60 }`)
    #[serde(default)]
    pub presets: HashMap<String, Policy>,
    /// Guarded routes
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Guard-wide limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum declared body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    /// Interval between expired-counter sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Policy applied to routes without one
    #[serde(default = "default_policy")]
    pub default_policy: PolicySelection,
}

/// A policy by preset name or spelled out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PolicySelection {
    Named(String),
    Explicit(Policy),
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route path (e.g., "/api/report")
    pub path: String,
    /// Rate limit bucket for this route
    pub bucket: String,
    /// Policy for this route (the default policy applies otherwise)
    #[serde(default)]
    pub policy: Option<PolicySelection>,
    /// Body size override in bytes
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
    /// Route description
    #[serde(default)]
    pub description: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> u64 {
    DEFAULT_MAX_BODY_BYTES
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_policy() -> PolicySelection {
    PolicySelection::Named(PolicyPreset::General.name().to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            sweep_interval_secs: default_sweep_interval(),
            default_policy: default_policy(),
        }
    }
}

impl LimitsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AdmissionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AdmissionError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Resolve a policy selection against the presets and their overrides
    pub fn resolve_policy(&self, selection: &PolicySelection) -> Result<Policy> {
        let policy = match selection {
            PolicySelection::Explicit(policy) => *policy,
            PolicySelection::Named(name) => {
                let preset = PolicyPreset::from_str(name)?;
                self.presets
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(preset.name()))
                    .map(|(_, policy)| *policy)
                    .unwrap_or_else(|| preset.policy())
            }
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Policy for routes that don't name one
    pub fn default_policy(&self) -> Result<Policy> {
        self.resolve_policy(&self.limits.default_policy)
    }

    /// Guard settings for one route
    pub fn guard_config(&self, route: &RouteConfig) -> Result<GuardConfig> {
        let mut config = GuardConfig::new(route.bucket.clone());
        if let Some(selection) = &route.policy {
            config = config.with_policy(self.resolve_policy(selection)?);
        }
        if let Some(max_body_bytes) = route.max_body_bytes {
            config = config.with_max_body_bytes(max_body_bytes);
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.limits.sweep_interval_secs == 0 {
            return Err(AdmissionError::Config(
                "limits.sweep_interval_secs must be > 0".to_string(),
            ));
        }

        if self.identity.trusted_headers.is_empty() {
            return Err(AdmissionError::Config(
                "identity.trusted_headers cannot be empty".to_string(),
            ));
        }

        for (name, policy) in &self.presets {
            PolicyPreset::from_str(name)?;
            policy.validate().map_err(|e| {
                AdmissionError::Config(format!("Preset override '{}': {}", name, e))
            })?;
        }

        self.default_policy()?;

        let mut seen_paths = HashSet::new();
        for route in &self.routes {
            if route.path.is_empty() {
                return Err(AdmissionError::Config(
                    "Route path cannot be empty".to_string(),
                ));
            }

            if !route.path.starts_with('/') {
                return Err(AdmissionError::Config(format!(
                    "Route path must start with '/': {}",
                    route.path
                )));
            }

            if route.path == HEALTH_PATH || !seen_paths.insert(route.path.as_str()) {
                return Err(AdmissionError::Config(format!(
                    "Duplicate route path: {}",
                    route.path
                )));
            }

            if route.bucket.trim().is_empty() {
                return Err(AdmissionError::Config(format!(
                    "Rate limit bucket cannot be empty for route: {}",
                    route.path
                )));
            }

            if let Some(selection) = &route.policy {
                self.resolve_policy(selection).map_err(|e| {
                    AdmissionError::Config(format!("Route {}: {}", route.path, e))
                })?;
            }
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            identity: IdentityConfig::default(),
            presets: HashMap::new(),
            routes: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000

limits:
  max_body_bytes: 50000
  sweep_interval_secs: 30

presets:
  auth:
    max_requests: 3
    window_secs: 120

routes:
  - path: "/api/report"
    bucket: "expensive-op"
    policy: expensive
    description: "Report generation"
  - path: "/api/login"
    bucket: "auth"
    policy: auth
  - path: "/api/contact"
    bucket: "email-send"
    policy:
      max_requests: 2
      window_secs: 600
    max_body_bytes: 2000
"#;

        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.limits.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.routes.len(), 3);

        let report = config.guard_config(&config.routes[0]).unwrap();
        assert_eq!(report.bucket, "expensive-op");
        assert_eq!(report.policy, Some(PolicyPreset::EXPENSIVE));
        assert_eq!(report.max_body_bytes, None);

        let login = config.guard_config(&config.routes[1]).unwrap();
        assert_eq!(login.policy, Some(Policy::new(3, 120).unwrap()));

        let contact = config.guard_config(&config.routes[2]).unwrap();
        assert_eq!(contact.policy, Some(Policy::new(2, 600).unwrap()));
        assert_eq!(contact.max_body_bytes, Some(2000));
    }

    #[test]
    fn test_default_values() {
        let config = AdmissionConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_body_bytes, 100_000);
        assert_eq!(config.limits.sweep_interval_secs, 60);
        assert_eq!(config.default_policy().unwrap(), PolicyPreset::GENERAL);
        assert_eq!(config.identity.trusted_headers.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_preset() {
        let yaml = r#"
routes:
  - path: "/api/x"
    bucket: "x"
    policy: unlimited
"#;
        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_quota() {
        let mut config = AdmissionConfig::default_config();
        config.routes.push(RouteConfig {
            path: "/api/test".to_string(),
            bucket: "general".to_string(),
            policy: Some(PolicySelection::Explicit(Policy {
                max_requests: 0,
                window_secs: 60,
            })),
            max_body_bytes: None,
            description: "".to_string(),
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_path() {
        let yaml = r#"
routes:
  - path: "/api/x"
    bucket: "a"
  - path: "/api/x"
    bucket: "b"
"#;
        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
routes:
  - path: "/health"
    bucket: "general"
"#;
        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_bucket() {
        let mut config = AdmissionConfig::default_config();
        config.routes.push(RouteConfig {
            path: "/api/test".to_string(),
            bucket: " ".to_string(),
            policy: None,
            max_body_bytes: None,
            description: "".to_string(),
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_preset_override() {
        let mut config = AdmissionConfig::default_config();
        config.presets.insert(
            "turbo".to_string(),
            Policy {
                max_requests: 100,
                window_secs: 1,
            },
        );
        assert!(config.validate().is_err());

        let mut config = AdmissionConfig::default_config();
        config.presets.insert(
            "general".to_string(),
            Policy {
                max_requests: 100,
                window_secs: 0,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admission.yaml");
        std::fs::write(&path, "limits:\n  default_policy: auth\n").unwrap();

        let config = AdmissionConfig::from_file(&path).unwrap();
        assert_eq!(config.default_policy().unwrap(), PolicyPreset::AUTH);

        assert!(AdmissionConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
