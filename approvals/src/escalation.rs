//! Escalation management.
//!
//! Adds requirement tiers to an open request, either on an approver's
//! request or automatically when the sweeper sees a stalled request nearing
//! its deadline. Escalated requests keep accepting signatures against the
//! enlarged requirement set.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use constitution::{merge_requirement, ApprovalRequirement, RequirementCatalog, RequirementSpec};

use crate::config::AuthorizationConfig;
use crate::events::ApprovalEventKind;
use crate::store::RequestStore;
use crate::types::{
    ApprovalError, ApprovalRequest, ApprovalStatus, EscalationRecord, EscalationTrigger, Result,
};

/// Manages escalation of open requests to additional tiers.
pub struct EscalationManager {
    store: Arc<RequestStore>,
    catalog: RequirementCatalog,
    authorization: AuthorizationConfig,
}

impl EscalationManager {
    pub fn new(
        store: Arc<RequestStore>,
        catalog: RequirementCatalog,
        authorization: AuthorizationConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            authorization,
        }
    }

    pub fn catalog(&self) -> &RequirementCatalog {
        &self.catalog
    }

    /// Resolve a requirement spec against the catalog and escalate with it.
    pub async fn escalate_spec(
        &self,
        request_id: &str,
        spec: &RequirementSpec,
        trigger: EscalationTrigger,
    ) -> Result<ApprovalRequest> {
        let requirement = self.catalog.resolve(spec)?;
        self.escalate(request_id, requirement, trigger).await
    }

    /// Add a requirement tier to an open request.
    pub async fn escalate(
        &self,
        request_id: &str,
        requirement: ApprovalRequirement,
        trigger: EscalationTrigger,
    ) -> Result<ApprovalRequest> {
        self.escalate_when(request_id, requirement, trigger, |_| Ok(()))
            .await
    }

    /// Escalate only if `guard` still holds under the request's lock.
    pub(crate) async fn escalate_when<G>(
        &self,
        request_id: &str,
        requirement: ApprovalRequirement,
        trigger: EscalationTrigger,
        guard: G,
    ) -> Result<ApprovalRequest>
    where
        G: FnOnce(&ApprovalRequest) -> Result<()>,
    {
        requirement.validate()?;
        let approval_type = requirement.approval_type;
        let record_trigger = trigger.clone();

        let request = self
            .store
            .update(request_id, |request| {
                let now = self.store.clock().now();
                request.ensure_open()?;
                // A lapsed request belongs to the sweeper, never revive it
                if now >= request.expires_at {
                    return Err(ApprovalError::DeadlinePassed {
                        request_id: request.request_id.clone(),
                        expires_at: request.expires_at,
                    });
                }
                guard(request)?;
                self.authorize(request, &trigger)?;

                merge_requirement(&mut request.requirements, requirement.clone());

                // Give the escalated tier its full window, never shorten the request
                let tier_deadline =
                    request.created_at + Duration::minutes(i64::from(requirement.timeout_minutes));
                request.expires_at = request.expires_at.max(tier_deadline);

                if request.status == ApprovalStatus::Pending {
                    request.transition(ApprovalStatus::Escalated, now)?;
                }
                request.escalations.push(EscalationRecord {
                    requirement,
                    trigger,
                    escalated_at: now,
                });
                Ok(ApprovalEventKind::Escalated)
            })
            .await?;

        info!(
            request_id = %request.request_id,
            approval_type = %approval_type,
            trigger = ?record_trigger,
            expires_at = %request.expires_at,
            "Approval request escalated"
        );
        Ok(request)
    }

    fn authorize(&self, request: &ApprovalRequest, trigger: &EscalationTrigger) -> Result<()> {
        let EscalationTrigger::Manual { actor_role, .. } = trigger else {
            return Ok(());
        };

        let allowed = self.authorization.is_privileged(actor_role)
            || request
                .requirements
                .iter()
                .any(|r| self.authorization.can_sign(actor_role, r.approval_type));
        if allowed {
            Ok(())
        } else {
            Err(ApprovalError::UnauthorizedEscalation {
                request_id: request.request_id.clone(),
                role: actor_role.clone(),
            })
        }
    }
}
