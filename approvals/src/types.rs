//! Core types for the approval workflow.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use constitution::{ApprovalRequirement, ApprovalType, ConstitutionError};

/// Lifecycle state of an approval request.
///
/// `Escalated` is a non-terminal sub-state of `Pending`. `Approved`, `Denied`
/// and `Expired` are terminal and have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Collecting signatures
    Pending,
    /// Collecting signatures against an enlarged requirement set
    Escalated,
    /// Every requirement met its quorum
    Approved,
    /// A denial signature landed
    Denied,
    /// Deadline passed before quorum
    Expired,
}

impl ApprovalStatus {
    /// Whether the request can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::Expired)
    }

    /// Whether moving to `next` respects the state machine.
    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Escalated) => true,
            (Self::Pending | Self::Escalated, Self::Approved | Self::Denied | Self::Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Escalated => "escalated",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An approver's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SignatureDecision {
    Approved,
    Denied,
}

/// A signature as recorded on a request. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ApprovalSignature {
    /// Who signed
    pub approver_id: String,
    /// Role the approver signed under
    pub approver_role: String,
    /// Tier the signature counts toward
    pub approval_type: ApprovalType,
    pub decision: SignatureDecision,
    /// When the ledger accepted the signature
    pub timestamp: DateTime<Utc>,
    /// MFA assertion from the identity provider
    pub mfa_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A signature as submitted by an approver, before the ledger stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSubmission {
    pub approver_id: String,
    pub approver_role: String,
    pub approval_type: ApprovalType,
    pub decision: SignatureDecision,
    #[serde(default)]
    pub mfa_verified: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SignatureSubmission {
    /// An approving signature without MFA.
    pub fn approve(
        approver_id: impl Into<String>,
        approver_role: impl Into<String>,
        approval_type: ApprovalType,
    ) -> Self {
        Self {
            approver_id: approver_id.into(),
            approver_role: approver_role.into(),
            approval_type,
            decision: SignatureDecision::Approved,
            mfa_verified: false,
            notes: None,
        }
    }

    /// A denying signature without MFA.
    pub fn deny(
        approver_id: impl Into<String>,
        approver_role: impl Into<String>,
        approval_type: ApprovalType,
    ) -> Self {
        Self {
            decision: SignatureDecision::Denied,
            ..Self::approve(approver_id, approver_role, approval_type)
        }
    }

    /// Builder: mark the MFA assertion as verified.
    pub fn with_mfa(mut self) -> Self {
        self.mfa_verified = true;
        self
    }

    /// Builder: attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub(crate) fn into_signature(self, timestamp: DateTime<Utc>) -> ApprovalSignature {
        ApprovalSignature {
            approver_id: self.approver_id,
            approver_role: self.approver_role,
            approval_type: self.approval_type,
            decision: self.decision,
            timestamp,
            mfa_verified: self.mfa_verified,
            notes: self.notes,
        }
    }
}

/// What caused an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// An authorized approver asked for it
    Manual { actor_id: String, actor_role: String },
    /// The sweeper fired it on deadline pressure
    Automatic { reason: String },
}

/// One entry of a request's escalation audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EscalationRecord {
    /// Requirement that was added or merged
    pub requirement: ApprovalRequirement,
    pub trigger: EscalationTrigger,
    pub escalated_at: DateTime<Utc>,
}

/// A gated action awaiting human sign-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ApprovalRequest {
    /// Unique identifier
    pub request_id: String,
    pub action_id: String,
    pub action_type: String,
    pub action_category: String,
    /// Risk score supplied at submission (0-100)
    pub risk_score: u8,
    pub requested_by: String,
    /// Facts the action was evaluated against
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Tiers to satisfy, deduplicated by approval type
    pub requirements: Vec<ApprovalRequirement>,
    /// Append-only signature log
    #[serde(default)]
    pub signatures: Vec<ApprovalSignature>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Rules that produced the gating decision
    #[serde(default)]
    pub matched_rule_ids: Vec<String>,
    /// Rule snapshot the decision was evaluated against
    #[serde(default)]
    pub snapshot_version: u64,
    /// Escalation audit trail
    #[serde(default)]
    pub escalations: Vec<EscalationRecord>,
    /// Incremented on every committed mutation
    #[serde(default)]
    pub revision: u64,
}

impl ApprovalRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether an approver already signed.
    pub fn has_signed(&self, approver_id: &str) -> bool {
        self.signatures.iter().any(|s| s.approver_id == approver_id)
    }

    /// Requirement for an approval type, if the request carries one.
    pub fn requirement(&self, approval_type: ApprovalType) -> Option<&ApprovalRequirement> {
        self.requirements
            .iter()
            .find(|r| r.approval_type == approval_type)
    }

    /// Approved signatures counting toward a tier.
    pub fn approved_count(&self, approval_type: ApprovalType) -> u32 {
        let count = self
            .signatures
            .iter()
            .filter(|s| s.approval_type == approval_type)
            .filter(|s| s.decision == SignatureDecision::Approved)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Requirements that have not reached their quorum.
    pub fn unmet_requirements(&self) -> impl Iterator<Item = &ApprovalRequirement> {
        self.requirements
            .iter()
            .filter(|r| self.approved_count(r.approval_type) < r.minimum_approvals)
    }

    /// Whether every requirement reached its quorum.
    pub fn quorum_met(&self) -> bool {
        self.unmet_requirements().next().is_none()
    }

    /// Move to a new status, stamping completion for terminal states.
    pub(crate) fn transition(&mut self, next: ApprovalStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ApprovalError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }

    /// Fail with `RequestClosed` when terminal.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(ApprovalError::RequestClosed {
                request_id: self.request_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Error types for the approval workflow.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// No request with that ID
    #[error("Approval request not found: {0}")]
    RequestNotFound(String),

    /// Request is already terminal
    #[error("Approval request {request_id} is closed ({status})")]
    RequestClosed {
        request_id: String,
        status: ApprovalStatus,
    },

    /// Approver already signed this request
    #[error("Approver {approver_id} already signed request {request_id}")]
    DuplicateApprover {
        request_id: String,
        approver_id: String,
    },

    /// Tier demands MFA and the signature lacks it
    #[error("MFA required for {approval_type} signatures")]
    MfaRequired { approval_type: ApprovalType },

    /// Role may not sign the declared tier
    #[error("Role '{role}' is not authorized to sign {approval_type}")]
    UnauthorizedApprovalType {
        role: String,
        approval_type: ApprovalType,
    },

    /// Declared tier is not among the request's requirements
    #[error("Request {request_id} does not require {approval_type} approval")]
    ApprovalTypeNotRequired {
        request_id: String,
        approval_type: ApprovalType,
    },

    /// Tier already reached its quorum
    #[error("Requirement {approval_type} on request {request_id} is already satisfied")]
    RequirementAlreadySatisfied {
        request_id: String,
        approval_type: ApprovalType,
    },

    /// Actor may not escalate this request
    #[error("Role '{role}' may not escalate request {request_id}")]
    UnauthorizedEscalation { request_id: String, role: String },

    /// Only privileged roles may cancel
    #[error("Role '{role}' may not cancel request {request_id}")]
    UnauthorizedCancellation { request_id: String, role: String },

    /// Deadline passed, waiting for the sweeper to expire it
    #[error("Approval request {request_id} lapsed at {expires_at}")]
    DeadlinePassed {
        request_id: String,
        expires_at: DateTime<Utc>,
    },

    /// Risk score outside 0-100
    #[error("Risk score {0} is outside 0-100")]
    InvalidRiskScore(u8),

    /// State machine violation
    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    /// Durable journal failure
    #[error("Journal error: {0}")]
    Journal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule or requirement error
    #[error("Constitution error: {0}")]
    Constitution(#[from] ConstitutionError),
}

impl ApprovalError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestNotFound(_) => "request_not_found",
            Self::RequestClosed { .. } => "request_closed",
            Self::DuplicateApprover { .. } => "duplicate_approver",
            Self::MfaRequired { .. } => "mfa_required",
            Self::UnauthorizedApprovalType { .. } => "unauthorized_approval_type",
            Self::ApprovalTypeNotRequired { .. } => "approval_type_not_required",
            Self::RequirementAlreadySatisfied { .. } => "requirement_already_satisfied",
            Self::UnauthorizedEscalation { .. } => "unauthorized_escalation",
            Self::UnauthorizedCancellation { .. } => "unauthorized_cancellation",
            Self::DeadlinePassed { .. } => "deadline_passed",
            Self::InvalidRiskScore(_) => "invalid_risk_score",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Journal(_) => "journal",
            Self::Config(_) => "config",
            Self::Constitution(_) => "constitution",
        }
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn request(requirements: Vec<ApprovalRequirement>) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            request_id: "req-1".to_string(),
            action_id: "act-1".to_string(),
            action_type: "drone_dispatch".to_string(),
            action_category: "surveillance".to_string(),
            risk_score: 40,
            requested_by: "dispatch-ai".to_string(),
            context: BTreeMap::new(),
            requirements,
            signatures: vec![],
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now,
            completed_at: None,
            matched_rule_ids: vec![],
            snapshot_version: 1,
            escalations: vec![],
            revision: 0,
        }
    }

    #[test]
    fn test_state_machine() {
        use ApprovalStatus::*;
        assert!(Pending.can_transition_to(Escalated));
        assert!(Escalated.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Expired));
        assert!(!Escalated.can_transition_to(Pending));
        assert!(!Escalated.can_transition_to(Escalated));
        for terminal in [Approved, Denied, Expired] {
            assert!(terminal.is_terminal());
            for next in [Pending, Escalated, Approved, Denied, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_quorum_counts_only_matching_approvals() {
        let mut req = request(vec![
            ApprovalRequirement::new(ApprovalType::MultiFactor, 2, false, 30).unwrap(),
        ]);
        let now = Utc::now();
        req.signatures.push(
            SignatureSubmission::approve("a", "supervisor", ApprovalType::MultiFactor).into_signature(now),
        );
        req.signatures.push(
            SignatureSubmission::approve("b", "supervisor", ApprovalType::Supervisor).into_signature(now),
        );
        assert_eq!(req.approved_count(ApprovalType::MultiFactor), 1);
        assert!(!req.quorum_met());

        req.signatures.push(
            SignatureSubmission::approve("c", "supervisor", ApprovalType::MultiFactor).into_signature(now),
        );
        assert!(req.quorum_met());
    }

    #[test]
    fn test_transition_stamps_completion() {
        let mut req = request(vec![]);
        let at = Utc::now();
        req.transition(ApprovalStatus::Expired, at).unwrap();
        assert_eq!(req.completed_at, Some(at));
        assert!(req.ensure_open().is_err());
        assert!(matches!(
            req.transition(ApprovalStatus::Approved, at),
            Err(ApprovalError::InvalidTransition { .. })
        ));
    }
}
