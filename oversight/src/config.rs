//! Daemon configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use approvals::ApprovalConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OversightConfig {
    /// YAML rule document to load and watch
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,

    /// Append-only request journal; in-memory when absent
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// Seconds between rule file checks
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Approval workflow settings
    #[serde(default)]
    pub approvals: ApprovalConfig,
}

impl Default for OversightConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            journal_path: None,
            reload_interval_secs: default_reload_interval(),
            approvals: ApprovalConfig::default(),
        }
    }
}

fn default_rules_path() -> PathBuf { PathBuf::from("rules.yaml") }
fn default_reload_interval() -> u64 { 10 }

impl OversightConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.approvals.validate()?;
        Ok(config)
    }

    /// Load from disk, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = OversightConfig::load(&dir.path().join("missing.yaml")).unwrap();
        assert_eq!(config.rules_path, PathBuf::from("rules.yaml"));
        assert_eq!(config.reload_interval_secs, 10);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn test_nested_approval_config() {
        let yaml = r#"
rules_path: /etc/oversight/rules.yaml
journal_path: /var/lib/oversight/requests.jsonl
approvals:
  evaluator:
    unmatched:
      policy: require_review
      approval_type: supervisor
  sweeper:
    tick_secs: 45
"#;
        let config = OversightConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.approvals.sweeper.tick_secs, 45);
        assert_eq!(
            config.journal_path.as_deref(),
            Some(Path::new("/var/lib/oversight/requests.jsonl"))
        );
    }

    #[test]
    fn test_invalid_approval_config_rejected() {
        let yaml = r#"
approvals:
  sweeper:
    tick_secs: 0
"#;
        assert!(OversightConfig::from_yaml(yaml).is_err());
    }
}
