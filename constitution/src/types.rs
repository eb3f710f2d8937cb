//! Core types for the constitutional rule set.
//!
//! These types model the 7-layer precedence hierarchy, the rules that live in
//! each layer, the approval tiers a rule can demand, and the decision the
//! evaluator produces for a proposed action.
//!
//! With the `typescript` feature enabled, these types can be exported to TypeScript
//! using ts-rs for consistency with the dashboard frontend.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::error::ConstitutionError;

/// Constitutional layer hierarchy.
///
/// Higher layers have greater precedence. A denial at a higher layer can never
/// be loosened by an allowance at a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ConstitutionalLayer {
    /// Operational autonomy settings - least authority
    Autonomy = 1,
    /// Ethics board guidance
    Ethics = 2,
    /// Agency standard operating procedures
    AgencySop = 3,
    /// Municipal ordinances
    LocalOrdinance = 4,
    /// State and federal statutes
    Statutory = 5,
    /// State constitution
    StateConstitutional = 6,
    /// Federal constitution - supreme
    FederalConstitutional = 7,
}

impl ConstitutionalLayer {
    /// Get the precedence value (higher = more authority)
    pub fn precedence(&self) -> u8 {
        *self as u8
    }

    /// Check if this layer can override another
    pub fn can_override(&self, other: &Self) -> bool {
        self.precedence() > other.precedence()
    }

    /// Get the wire name of the layer
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FederalConstitutional => "federal_constitutional",
            Self::StateConstitutional => "state_constitutional",
            Self::Statutory => "statutory",
            Self::LocalOrdinance => "local_ordinance",
            Self::AgencySop => "agency_sop",
            Self::Ethics => "ethics",
            Self::Autonomy => "autonomy",
        }
    }

    /// All layers in precedence order (highest first)
    pub fn all_descending() -> [Self; 7] {
        [
            Self::FederalConstitutional,
            Self::StateConstitutional,
            Self::Statutory,
            Self::LocalOrdinance,
            Self::AgencySop,
            Self::Ethics,
            Self::Autonomy,
        ]
    }
}

impl fmt::Display for ConstitutionalLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict a single rule assigns to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RuleResult {
    /// Action may proceed
    Allowed,
    /// Action is prohibited
    Denied,
    /// Action may proceed once a human signs off
    AllowedWithHumanReview,
}

impl RuleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::AllowedWithHumanReview => "allowed_with_human_review",
        }
    }
}

impl fmt::Display for RuleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier of human authority that can sign off on an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    SingleOperator,
    Supervisor,
    CommandStaff,
    MultiFactor,
    LegalReview,
    CityManager,
    EmergencyDirector,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleOperator => "single_operator",
            Self::Supervisor => "supervisor",
            Self::CommandStaff => "command_staff",
            Self::MultiFactor => "multi_factor",
            Self::LegalReview => "legal_review",
            Self::CityManager => "city_manager",
            Self::EmergencyDirector => "emergency_director",
        }
    }

    pub fn all() -> [Self; 7] {
        [
            Self::SingleOperator,
            Self::Supervisor,
            Self::CommandStaff,
            Self::MultiFactor,
            Self::LegalReview,
            Self::CityManager,
            Self::EmergencyDirector,
        ]
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier of sign-off an approval request must collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ApprovalRequirement {
    /// Which tier of authority must sign
    pub approval_type: ApprovalType,
    /// Approved signatures of this type needed (>= 1)
    pub minimum_approvals: u32,
    /// Whether each signature must carry a verified MFA assertion
    pub requires_mfa: bool,
    /// Window this tier gets to collect its quorum (> 0)
    pub timeout_minutes: u32,
}

impl ApprovalRequirement {
    /// Create a validated requirement.
    pub fn new(
        approval_type: ApprovalType,
        minimum_approvals: u32,
        requires_mfa: bool,
        timeout_minutes: u32,
    ) -> Result<Self, ConstitutionError> {
        let requirement = Self {
            approval_type,
            minimum_approvals,
            requires_mfa,
            timeout_minutes,
        };
        requirement.validate()?;
        Ok(requirement)
    }

    /// Check the numeric invariants.
    pub fn validate(&self) -> Result<(), ConstitutionError> {
        if self.minimum_approvals == 0 {
            return Err(ConstitutionError::InvalidRequirement(format!(
                "{}: minimum_approvals must be at least 1",
                self.approval_type
            )));
        }
        if self.timeout_minutes == 0 {
            return Err(ConstitutionError::InvalidRequirement(format!(
                "{}: timeout_minutes must be positive",
                self.approval_type
            )));
        }
        Ok(())
    }

    /// Fold another requirement of the same type into this one.
    ///
    /// Quorum takes the max, MFA the logical OR, and the tier deadline the
    /// most conservative (shortest) window.
    pub fn merge(&mut self, other: &ApprovalRequirement) {
        debug_assert_eq!(self.approval_type, other.approval_type);
        self.minimum_approvals = self.minimum_approvals.max(other.minimum_approvals);
        self.requires_mfa |= other.requires_mfa;
        self.timeout_minutes = self.timeout_minutes.min(other.timeout_minutes);
    }
}

/// Append `incoming` to `requirements`, merging into an existing tier of the
/// same approval type. Order of first appearance is preserved.
pub fn merge_requirement(requirements: &mut Vec<ApprovalRequirement>, incoming: ApprovalRequirement) {
    match requirements
        .iter_mut()
        .find(|r| r.approval_type == incoming.approval_type)
    {
        Some(existing) => existing.merge(&incoming),
        None => requirements.push(incoming),
    }
}

/// A single policy rule at one constitutional layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ConstitutionalRule {
    /// Unique identifier
    pub rule_id: String,
    /// Which layer this rule belongs to
    pub layer: ConstitutionalLayer,
    /// Predicate identifier evaluated against the action context
    pub condition: String,
    /// Action categories this rule governs
    pub action_categories: BTreeSet<String>,
    /// Verdict when the rule matches
    pub result: RuleResult,
    /// Higher wins within a layer
    #[serde(default)]
    pub priority: i32,
    /// Citations backing the rule, in order
    #[serde(default)]
    pub source_documents: Vec<String>,
    /// Human-readable justification for audit
    #[serde(default)]
    pub rationale: String,
    /// Named override conditions that disable this rule when active
    #[serde(default)]
    pub exceptions: BTreeSet<String>,
    /// Retired rules stay in the document but never match
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Approval tier demanded by an `allowed_with_human_review` verdict.
    /// Falls back to the layer default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_approval_type: Option<ApprovalType>,
}

fn default_true() -> bool {
    true
}

impl ConstitutionalRule {
    /// Whether this rule governs the given action category.
    pub fn governs(&self, category: &str) -> bool {
        self.action_categories.contains(category)
    }

    /// First listed exception the action declares active, if any.
    pub fn active_exception<'a>(&'a self, active: &BTreeSet<String>) -> Option<&'a str> {
        self.exceptions
            .iter()
            .find(|e| active.contains(*e))
            .map(String::as_str)
    }
}

/// A versioned rule document as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    /// Author-assigned version label
    #[serde(default)]
    pub version: String,
    /// All rules across all layers
    #[serde(default)]
    pub rules: Vec<ConstitutionalRule>,
}

impl RuleDocument {
    /// Parse a YAML rule document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConstitutionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConstitutionError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// An autonomous action proposed for evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ActionProposal {
    /// Unique action identifier
    pub action_id: String,
    /// Concrete action, e.g. "drone_dispatch"
    pub action_type: String,
    /// Category rules are keyed on, e.g. "crowd_management"
    pub action_category: String,
    /// System or operator proposing the action
    #[serde(default)]
    pub requested_by: String,
    /// Named facts conditions are evaluated against
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Exceptions the proposer declares active
    #[serde(default)]
    pub active_exceptions: BTreeSet<String>,
}

impl ActionProposal {
    /// Create a proposal with an empty context.
    pub fn new(
        action_id: impl Into<String>,
        action_type: impl Into<String>,
        action_category: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            action_type: action_type.into(),
            action_category: action_category.into(),
            ..Default::default()
        }
    }

    /// Builder: set the proposer.
    pub fn requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = requested_by.into();
        self
    }

    /// Builder: add a context fact.
    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Builder: declare an exception active.
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.active_exceptions.insert(exception.into());
        self
    }
}

/// The verdict one layer contributed to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct LayerVerdict {
    pub layer: ConstitutionalLayer,
    pub rule_id: String,
    pub result: RuleResult,
}

/// Configuration gaps surfaced while evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationWarning {
    /// No active rule in any layer governs the category
    UnknownActionCategory { category: String },
    /// Rules govern the category but none of their conditions matched
    NoMatchingRule { category: String },
    /// Same-layer, same-priority matching rules disagree; resolved by rule_id order
    EvaluationTieBreak {
        layer: ConstitutionalLayer,
        priority: i32,
        winner: String,
        contenders: Vec<String>,
    },
}

/// Outcome of evaluating an action against a rule snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Decision {
    /// Overall verdict
    pub result: RuleResult,
    /// Rules that determined each layer's verdict, in layer order
    pub matched_rule_ids: Vec<String>,
    /// Per-layer verdicts, in layer order
    pub layer_verdicts: Vec<LayerVerdict>,
    /// Deduplicated approval tiers demanded by review verdicts
    pub required_approvals: Vec<ApprovalRequirement>,
    /// Rule that denied the action, when one did
    pub denied_by: Option<String>,
    /// Whether the unmatched-category default produced the result
    pub fail_closed: bool,
    /// Configuration warnings to surface to operators
    pub warnings: Vec<EvaluationWarning>,
    /// Snapshot the decision was evaluated against
    pub snapshot_version: u64,
    pub snapshot_hash: String,
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        self.result == RuleResult::Denied
    }

    pub fn requires_review(&self) -> bool {
        self.result == RuleResult::AllowedWithHumanReview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_precedence() {
        assert!(ConstitutionalLayer::FederalConstitutional.can_override(&ConstitutionalLayer::AgencySop));
        assert!(ConstitutionalLayer::Ethics.can_override(&ConstitutionalLayer::Autonomy));
        assert!(!ConstitutionalLayer::Autonomy.can_override(&ConstitutionalLayer::Statutory));
    }

    #[test]
    fn test_layer_ordering() {
        let layers = ConstitutionalLayer::all_descending();
        assert_eq!(layers[0], ConstitutionalLayer::FederalConstitutional);
        assert_eq!(layers[6], ConstitutionalLayer::Autonomy);
        assert!(layers.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_requirement_validation() {
        assert!(ApprovalRequirement::new(ApprovalType::Supervisor, 0, false, 30).is_err());
        assert!(ApprovalRequirement::new(ApprovalType::Supervisor, 1, false, 0).is_err());
        assert!(ApprovalRequirement::new(ApprovalType::Supervisor, 1, false, 30).is_ok());
    }

    #[test]
    fn test_merge_requirement() {
        let mut reqs = vec![
            ApprovalRequirement::new(ApprovalType::Supervisor, 1, false, 60).unwrap(),
        ];
        merge_requirement(
            &mut reqs,
            ApprovalRequirement::new(ApprovalType::Supervisor, 2, true, 45).unwrap(),
        );
        merge_requirement(
            &mut reqs,
            ApprovalRequirement::new(ApprovalType::LegalReview, 1, false, 240).unwrap(),
        );

        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].minimum_approvals, 2);
        assert!(reqs[0].requires_mfa);
        assert_eq!(reqs[0].timeout_minutes, 45);
        assert_eq!(reqs[1].approval_type, ApprovalType::LegalReview);
    }

    #[test]
    fn test_rule_yaml_defaults() {
        let yaml = r#"
version: "2024.1"
rules:
  - rule_id: fed-assembly
    layer: federal_constitutional
    condition: action_restricts_speech_or_assembly
    action_categories: [crowd_management]
    result: denied
"#;
        let doc = RuleDocument::from_yaml(yaml).unwrap();
        let rule = &doc.rules[0];
        assert!(rule.is_active);
        assert_eq!(rule.priority, 0);
        assert!(rule.governs("crowd_management"));
        assert_eq!(rule.review_approval_type, None);
    }
}
