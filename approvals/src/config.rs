//! Configuration for the approval workflow.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use constitution::{ApprovalType, EvaluatorConfig, RequirementCatalog, RequirementSpec};

use crate::types::{ApprovalError, Result};

/// Top-level approval workflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Constitution evaluator settings
    pub evaluator: EvaluatorConfig,
    /// Per-tier quorum, MFA and deadline
    pub catalog: RequirementCatalog,
    /// Risk-score triggers
    pub orchestrator: OrchestratorConfig,
    /// Role to approval-type table
    pub authorization: AuthorizationConfig,
    /// Expiry and auto-escalation loop
    pub sweeper: SweeperConfig,
}

impl ApprovalConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ApprovalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ApprovalError::Config(e.to_string()))
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;

        let triggers = self
            .orchestrator
            .risk_triggers
            .iter()
            .map(|(category, trigger)| (category.as_str(), trigger))
            .chain(
                self.orchestrator
                    .default_trigger
                    .as_ref()
                    .map(|trigger| ("default", trigger)),
            );
        for (name, trigger) in triggers {
            if trigger.threshold > 100 {
                return Err(ApprovalError::Config(format!(
                    "risk trigger '{}' threshold {} is outside 0-100",
                    name, trigger.threshold
                )));
            }
            if trigger.requirements.is_empty() {
                return Err(ApprovalError::Config(format!(
                    "risk trigger '{}' names no requirements",
                    name
                )));
            }
            for spec in &trigger.requirements {
                self.catalog.resolve(spec)?;
            }
        }

        if self.sweeper.tick_secs == 0 {
            return Err(ApprovalError::Config("sweeper tick_secs must be positive".to_string()));
        }
        self.catalog.resolve(&self.sweeper.escalation_requirement)?;
        Ok(())
    }
}

/// A risk-score threshold and the tiers it demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTrigger {
    /// Fires when risk_score >= threshold
    pub threshold: u8,
    pub requirements: Vec<RequirementSpec>,
}

/// Approval orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Triggers keyed by action category
    pub risk_triggers: BTreeMap<String, RiskTrigger>,
    /// Trigger for categories without their own entry
    pub default_trigger: Option<RiskTrigger>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            risk_triggers: BTreeMap::new(),
            default_trigger: Some(RiskTrigger {
                threshold: 85,
                requirements: vec![RequirementSpec::of(ApprovalType::Supervisor)],
            }),
        }
    }
}

impl OrchestratorConfig {
    /// Trigger that applies to a category.
    pub fn trigger_for(&self, category: &str) -> Option<&RiskTrigger> {
        self.risk_triggers
            .get(category)
            .or(self.default_trigger.as_ref())
    }
}

/// Which roles may sign which approval tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Role name to signable approval types
    pub roles: BTreeMap<String, BTreeSet<ApprovalType>>,
    /// Roles authorized for every tier and for cancellation
    pub privileged_roles: BTreeSet<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        use ApprovalType::*;

        let roles = [
            ("operator", vec![SingleOperator]),
            ("supervisor", vec![Supervisor, MultiFactor]),
            ("command_staff", vec![Supervisor, CommandStaff, MultiFactor]),
            ("legal_counsel", vec![LegalReview]),
            ("city_manager", vec![CityManager]),
            ("emergency_director", vec![CommandStaff, EmergencyDirector]),
        ]
        .into_iter()
        .map(|(role, types)| (role.to_string(), types.into_iter().collect()))
        .collect();

        Self {
            roles,
            privileged_roles: ["system_administrator".to_string()].into_iter().collect(),
        }
    }
}

impl AuthorizationConfig {
    pub fn is_privileged(&self, role: &str) -> bool {
        self.privileged_roles.contains(role)
    }

    /// Whether a role may sign a tier.
    ///
    /// Any authenticated (non-empty) role may sign `single_operator`.
    pub fn can_sign(&self, role: &str, approval_type: ApprovalType) -> bool {
        if role.trim().is_empty() {
            return false;
        }
        if approval_type == ApprovalType::SingleOperator || self.is_privileged(role) {
            return true;
        }
        self.roles
            .get(role)
            .is_some_and(|types| types.contains(&approval_type))
    }
}

/// Expiration sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub tick_secs: u64,
    /// Categories that auto-escalate when a request stalls near its deadline
    pub auto_escalate_categories: BTreeSet<String>,
    /// How close to `expires_at` a stalled request auto-escalates
    pub escalation_lead_minutes: u32,
    /// Tier added by auto-escalation
    pub escalation_requirement: RequirementSpec,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            auto_escalate_categories: BTreeSet::new(),
            escalation_lead_minutes: 5,
            escalation_requirement: RequirementSpec::of(ApprovalType::CommandStaff),
        }
    }
}
