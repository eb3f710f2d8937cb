//! Signature ledger.
//!
//! Records approve/deny signatures against a request. Each call validates,
//! appends, and recomputes quorum inside the request's critical section, so
//! two signatures racing to complete the last tier are strictly ordered and
//! the loser sees the request already approved.

use std::sync::Arc;

use tracing::{info, warn};

use constitution::ApprovalType;

use crate::config::AuthorizationConfig;
use crate::events::ApprovalEventKind;
use crate::store::RequestStore;
use crate::types::{
    ApprovalError, ApprovalRequest, ApprovalStatus, Result, SignatureDecision, SignatureSubmission,
};

/// Records signatures and resolves quorum.
pub struct SignatureLedger {
    store: Arc<RequestStore>,
    authorization: AuthorizationConfig,
}

impl SignatureLedger {
    pub fn new(store: Arc<RequestStore>, authorization: AuthorizationConfig) -> Self {
        Self {
            store,
            authorization,
        }
    }

    pub fn authorization(&self) -> &AuthorizationConfig {
        &self.authorization
    }

    /// Validate and append a signature atomically.
    pub async fn record_signature(
        &self,
        request_id: &str,
        submission: SignatureSubmission,
    ) -> Result<ApprovalRequest> {
        let approver_id = submission.approver_id.clone();
        let approval_type = submission.approval_type;

        let result = self
            .store
            .update(request_id, |request| {
                // Stamped under the lock so signature order matches time order
                let now = self.store.clock().now();
                self.check(request, &submission)?;
                let decision = submission.decision;
                request.signatures.push(submission.into_signature(now));

                if decision == SignatureDecision::Denied {
                    request.transition(ApprovalStatus::Denied, now)?;
                    return Ok(ApprovalEventKind::Denied);
                }
                if request.quorum_met() {
                    request.transition(ApprovalStatus::Approved, now)?;
                    return Ok(ApprovalEventKind::Approved);
                }
                Ok(ApprovalEventKind::Signed)
            })
            .await;

        match &result {
            Ok(request) => info!(
                request_id = %request_id,
                approver_id = %approver_id,
                approval_type = %approval_type,
                status = %request.status,
                "Signature recorded"
            ),
            Err(e) => warn!(
                request_id = %request_id,
                approver_id = %approver_id,
                approval_type = %approval_type,
                error = %e,
                "Signature rejected"
            ),
        }
        result
    }

    /// Cancel an open request as a denial from a privileged role.
    pub async fn cancel(
        &self,
        request_id: &str,
        actor_id: &str,
        actor_role: &str,
        mfa_verified: bool,
        reason: &str,
    ) -> Result<ApprovalRequest> {
        if !self.authorization.is_privileged(actor_role) {
            return Err(ApprovalError::UnauthorizedCancellation {
                request_id: request_id.to_string(),
                role: actor_role.to_string(),
            });
        }

        let current = self.store.get(request_id).await?;
        let approval_type = current
            .requirements
            .first()
            .map(|r| r.approval_type)
            .unwrap_or(ApprovalType::SingleOperator);

        let mut submission = SignatureSubmission::deny(actor_id, actor_role, approval_type)
            .with_notes(format!("cancelled: {reason}"));
        submission.mfa_verified = mfa_verified;

        self.record_signature(request_id, submission).await
    }

    /// Whether an approver could usefully sign the request right now.
    pub fn can_sign(&self, request: &ApprovalRequest, approver_id: &str, approver_role: &str) -> bool {
        !request.is_terminal()
            && !request.has_signed(approver_id)
            && request
                .unmet_requirements()
                .any(|r| self.authorization.can_sign(approver_role, r.approval_type))
    }

    fn check(&self, request: &ApprovalRequest, submission: &SignatureSubmission) -> Result<()> {
        request.ensure_open()?;

        if request.has_signed(&submission.approver_id) {
            return Err(ApprovalError::DuplicateApprover {
                request_id: request.request_id.clone(),
                approver_id: submission.approver_id.clone(),
            });
        }

        let privileged = self.authorization.is_privileged(&submission.approver_role);
        let requirement = request.requirement(submission.approval_type);
        if requirement.is_none() && !privileged {
            return Err(ApprovalError::ApprovalTypeNotRequired {
                request_id: request.request_id.clone(),
                approval_type: submission.approval_type,
            });
        }

        if requirement.is_some_and(|r| r.requires_mfa) && !submission.mfa_verified {
            return Err(ApprovalError::MfaRequired {
                approval_type: submission.approval_type,
            });
        }

        if !self
            .authorization
            .can_sign(&submission.approver_role, submission.approval_type)
        {
            return Err(ApprovalError::UnauthorizedApprovalType {
                role: submission.approver_role.clone(),
                approval_type: submission.approval_type,
            });
        }

        if submission.decision == SignatureDecision::Approved {
            if let Some(requirement) = requirement {
                if request.approved_count(requirement.approval_type) >= requirement.minimum_approvals {
                    return Err(ApprovalError::RequirementAlreadySatisfied {
                        request_id: request.request_id.clone(),
                        approval_type: requirement.approval_type,
                    });
                }
            }
        }

        Ok(())
    }
}
