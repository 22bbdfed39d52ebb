mod canary;
mod connector;
mod llm;
mod notify;
mod policy;
mod quota;
mod server;
mod workflow;

pub use canary::*;
pub use connector::*;
pub use llm::*;
pub use notify::*;
pub use policy::*;
pub use quota::*;
pub use server::*;
pub use workflow::*;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::autonomy::AutonomyConfig;
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root configuration, deserialized from `config.toml`. Secrets are never
/// stored here: entries reference `RF_*` environment variable names that
/// are read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub canary: CanaryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Autonomy defaults applied to orgs without an explicit config.
    #[serde(default)]
    pub autonomy: AutonomyConfig,
    /// Per-org autonomy overrides (key = org UUID).
    #[serde(default)]
    pub org_autonomy: HashMap<Uuid, AutonomyConfig>,
    /// Directory for JSONL state (runs, invocations, deliveries).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}

impl Config {
    /// Load from a TOML file. Missing file yields the default config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Autonomy config for an org, falling back to the defaults.
    pub fn autonomy_for(&self, org_id: Uuid) -> &AutonomyConfig {
        self.org_autonomy.get(&org_id).unwrap_or(&self.autonomy)
    }

    /// Validate the whole tree. Errors abort startup; warnings are logged.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port", "port must be non-zero"));
        }
        if self.workflow.workers == 0 {
            issues.push(ConfigIssue::error("workflow.workers", "must be at least 1"));
        }
        if self.workflow.max_active_runs_per_org == 0 {
            issues.push(ConfigIssue::error(
                "workflow.max_active_runs_per_org",
                "must be at least 1",
            ));
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue::warning(
                "llm.providers",
                "no LLM providers configured; intent routing will fail until one is added",
            ));
        }
        if let Some(fb) = &self.llm.fallback_provider {
            if !self.llm.providers.iter().any(|p| &p.id == fb) {
                issues.push(ConfigIssue::error(
                    "llm.fallback_provider",
                    "fallback_provider does not name a configured provider",
                ));
            }
        }
        if self.llm.requests_per_minute == 0 {
            issues.push(ConfigIssue::error(
                "llm.requests_per_minute",
                "must be at least 1",
            ));
        }
        if self.autonomy.timezone.parse::<chrono_tz::Tz>().is_err() {
            issues.push(ConfigIssue::error(
                "autonomy.timezone",
                "not a valid IANA timezone",
            ));
        }
        for (org, cfg) in &self.org_autonomy {
            if cfg.timezone.parse::<chrono_tz::Tz>().is_err() {
                issues.push(ConfigIssue::error(
                    "org_autonomy.timezone",
                    format!("org {org}: not a valid IANA timezone"),
                ));
            }
        }
        for (i, ep) in self.notify.endpoints.iter().enumerate() {
            if ep.url.is_empty() {
                issues.push(ConfigIssue::error(
                    "notify.endpoints",
                    format!("endpoint {i} has an empty url"),
                ));
            }
        }
        if self.policy.mode == PolicyMode::Remote && self.policy.url.is_none() {
            issues.push(ConfigIssue::error(
                "policy.url",
                "policy.mode = \"remote\" requires policy.url",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error), "{issues:?}");
    }

    #[test]
    fn bad_timezone_is_an_error() {
        let mut cfg = Config::default();
        cfg.autonomy.timezone = "Mars/Olympus".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "autonomy.timezone"));
    }

    #[test]
    fn remote_policy_without_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.policy.mode = PolicyMode::Remote;
        cfg.policy.url = None;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "policy.url" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn unknown_fallback_provider_is_an_error() {
        let mut cfg = Config::default();
        cfg.llm.fallback_provider = Some("ghost".into());
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "llm.fallback_provider"));
    }

    #[test]
    fn org_override_falls_back_to_default() {
        let cfg = Config::default();
        let org = Uuid::new_v4();
        assert_eq!(cfg.autonomy_for(org).mode, cfg.autonomy.mode);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/rf-config.toml")).unwrap();
        assert_eq!(cfg.server.port, ServerConfig::default().port);
    }
}
