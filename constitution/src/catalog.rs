//! Requirement catalog.
//!
//! Rules only name the approval tier they demand. The quorum, MFA and
//! deadline for each tier live here so deployments can tune them without
//! touching rule documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConstitutionError;
use crate::types::{ApprovalRequirement, ApprovalType};

/// Per-approval-type requirement defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementCatalog {
    entries: BTreeMap<ApprovalType, ApprovalRequirement>,
}

impl Default for RequirementCatalog {
    fn default() -> Self {
        let defaults = [
            (ApprovalType::SingleOperator, 1, false, 30),
            (ApprovalType::Supervisor, 1, false, 60),
            (ApprovalType::CommandStaff, 1, true, 60),
            (ApprovalType::MultiFactor, 2, true, 30),
            (ApprovalType::LegalReview, 1, true, 240),
            (ApprovalType::CityManager, 1, true, 120),
            (ApprovalType::EmergencyDirector, 1, true, 15),
        ];

        let entries = defaults
            .into_iter()
            .map(|(approval_type, minimum_approvals, requires_mfa, timeout_minutes)| {
                (
                    approval_type,
                    ApprovalRequirement {
                        approval_type,
                        minimum_approvals,
                        requires_mfa,
                        timeout_minutes,
                    },
                )
            })
            .collect();

        Self { entries }
    }
}

impl RequirementCatalog {
    /// Look up the requirement for a tier.
    ///
    /// Tiers missing from a customised catalog fall back to the built-in
    /// defaults so every approval type always resolves.
    pub fn requirement(&self, approval_type: ApprovalType) -> ApprovalRequirement {
        self.entries
            .get(&approval_type)
            .cloned()
            .unwrap_or_else(|| builtin(approval_type))
    }

    /// Override the entry for one tier.
    pub fn set(&mut self, requirement: ApprovalRequirement) -> Result<(), ConstitutionError> {
        requirement.validate()?;
        self.entries.insert(requirement.approval_type, requirement);
        Ok(())
    }

    /// Validate every entry, including that it is keyed by its own type.
    pub fn validate(&self) -> Result<(), ConstitutionError> {
        for (key, requirement) in &self.entries {
            if *key != requirement.approval_type {
                return Err(ConstitutionError::InvalidRequirement(format!(
                    "catalog entry {} describes {}",
                    key, requirement.approval_type
                )));
            }
            requirement.validate()?;
        }
        Ok(())
    }

    /// Resolve a spec against this catalog.
    pub fn resolve(&self, spec: &RequirementSpec) -> Result<ApprovalRequirement, ConstitutionError> {
        let mut requirement = self.requirement(spec.approval_type);
        if let Some(minimum) = spec.minimum_approvals {
            requirement.minimum_approvals = minimum;
        }
        if let Some(mfa) = spec.requires_mfa {
            requirement.requires_mfa = mfa;
        }
        if let Some(timeout) = spec.timeout_minutes {
            requirement.timeout_minutes = timeout;
        }
        requirement.validate()?;
        Ok(requirement)
    }
}

fn builtin(approval_type: ApprovalType) -> ApprovalRequirement {
    RequirementCatalog::default()
        .entries
        .remove(&approval_type)
        .unwrap_or(ApprovalRequirement {
            approval_type,
            minimum_approvals: 1,
            requires_mfa: true,
            timeout_minutes: 60,
        })
}

/// An approval tier named in configuration, with optional overrides of the
/// catalog defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSpec {
    pub approval_type: ApprovalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_approvals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_mfa: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
}

impl RequirementSpec {
    /// Spec that takes every value from the catalog.
    pub fn of(approval_type: ApprovalType) -> Self {
        Self {
            approval_type,
            minimum_approvals: None,
            requires_mfa: None,
            timeout_minutes: None,
        }
    }

    /// Builder: override the quorum.
    pub fn with_minimum(mut self, minimum_approvals: u32) -> Self {
        self.minimum_approvals = Some(minimum_approvals);
        self
    }

    /// Builder: override the MFA flag.
    pub fn with_mfa(mut self, requires_mfa: bool) -> Self {
        self.requires_mfa = Some(requires_mfa);
        self
    }

    /// Builder: override the tier deadline.
    pub fn with_timeout(mut self, timeout_minutes: u32) -> Self {
        self.timeout_minutes = Some(timeout_minutes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_type() {
        let catalog = RequirementCatalog::default();
        catalog.validate().unwrap();
        for approval_type in ApprovalType::all() {
            assert_eq!(catalog.requirement(approval_type).approval_type, approval_type);
        }
    }

    #[test]
    fn test_resolve_overrides() {
        let catalog = RequirementCatalog::default();
        let spec = RequirementSpec::of(ApprovalType::Supervisor)
            .with_minimum(2)
            .with_mfa(true);
        let requirement = catalog.resolve(&spec).unwrap();
        assert_eq!(requirement.minimum_approvals, 2);
        assert!(requirement.requires_mfa);
        assert_eq!(requirement.timeout_minutes, 60);

        let bad = RequirementSpec::of(ApprovalType::Supervisor).with_timeout(0);
        assert!(catalog.resolve(&bad).is_err());
    }

    #[test]
    fn test_partial_catalog_from_yaml() {
        let yaml = r#"
supervisor:
  approval_type: supervisor
  minimum_approvals: 3
  requires_mfa: false
  timeout_minutes: 20
"#;
        let catalog: RequirementCatalog = serde_yaml::from_str(yaml).unwrap();
        catalog.validate().unwrap();
        assert_eq!(catalog.requirement(ApprovalType::Supervisor).minimum_approvals, 3);
        // Missing tiers fall back to the built-in defaults
        assert_eq!(catalog.requirement(ApprovalType::MultiFactor).minimum_approvals, 2);
    }
}
