//! Approval orchestrator.
//!
//! Turns a review-requiring decision, a risk-score trigger, or both into an
//! [`ApprovalRequest`]. Requirement sets from the two triggers are unioned;
//! duplicate tiers merge to the strictest quorum and MFA and the shortest
//! per-tier window. The request as a whole lapses once the longest tier
//! window has passed.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use constitution::{
    merge_requirement, ActionProposal, ApprovalRequirement, ApprovalType, Decision,
    RequirementCatalog, RuleResult,
};

use crate::config::OrchestratorConfig;
use crate::store::RequestStore;
use crate::types::{ApprovalError, ApprovalRequest, ApprovalStatus, Result};

/// Creates approval requests for gated actions.
pub struct ApprovalOrchestrator {
    config: OrchestratorConfig,
    catalog: RequirementCatalog,
    store: Arc<RequestStore>,
}

impl ApprovalOrchestrator {
    pub fn new(config: OrchestratorConfig, catalog: RequirementCatalog, store: Arc<RequestStore>) -> Self {
        Self {
            config,
            catalog,
            store,
        }
    }

    /// Merged requirements for an action, empty when no trigger fires.
    pub fn plan(
        &self,
        action: &ActionProposal,
        decision: &Decision,
        risk_score: u8,
    ) -> Result<Vec<ApprovalRequirement>> {
        if risk_score > 100 {
            return Err(ApprovalError::InvalidRiskScore(risk_score));
        }

        let mut requirements = Vec::new();

        // A denied action has nothing to approve
        if decision.result == RuleResult::Denied {
            return Ok(requirements);
        }

        if decision.result == RuleResult::AllowedWithHumanReview {
            for requirement in &decision.required_approvals {
                requirement.validate()?;
                merge_requirement(&mut requirements, requirement.clone());
            }
            // Review was demanded but no tier named, fall back to one operator
            if requirements.is_empty() {
                warn!(action_id = %action.action_id, "Review decision without tiers, requiring single operator");
                requirements.push(self.catalog.requirement(ApprovalType::SingleOperator));
            }
        }

        if let Some(trigger) = self.config.trigger_for(&action.action_category) {
            if risk_score >= trigger.threshold {
                debug!(
                    action_id = %action.action_id,
                    risk_score,
                    threshold = trigger.threshold,
                    "Risk trigger fired"
                );
                for spec in &trigger.requirements {
                    merge_requirement(&mut requirements, self.catalog.resolve(spec)?);
                }
            }
        }

        Ok(requirements)
    }

    /// Create a request if the decision or the risk score calls for one.
    ///
    /// Returns `None` when the action may proceed unreviewed, or was denied.
    pub async fn submit(
        &self,
        action: &ActionProposal,
        decision: &Decision,
        risk_score: u8,
    ) -> Result<Option<ApprovalRequest>> {
        let requirements = self.plan(action, decision, risk_score)?;
        if requirements.is_empty() {
            debug!(action_id = %action.action_id, result = %decision.result, "No approval required");
            return Ok(None);
        }

        let created_at = self.store.clock().now();
        let window = requirements
            .iter()
            .map(|r| r.timeout_minutes)
            .max()
            .unwrap_or_default();

        let request = ApprovalRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            action_id: action.action_id.clone(),
            action_type: action.action_type.clone(),
            action_category: action.action_category.clone(),
            risk_score,
            requested_by: action.requested_by.clone(),
            context: action.context.clone(),
            requirements,
            signatures: Vec::new(),
            status: ApprovalStatus::Pending,
            created_at,
            expires_at: created_at + Duration::minutes(i64::from(window)),
            completed_at: None,
            matched_rule_ids: decision.matched_rule_ids.clone(),
            snapshot_version: decision.snapshot_version,
            escalations: Vec::new(),
            revision: 0,
        };

        let request = self.store.insert(request).await?;
        info!(
            request_id = %request.request_id,
            action_id = %request.action_id,
            category = %request.action_category,
            tiers = request.requirements.len(),
            expires_at = %request.expires_at,
            "Approval request created"
        );
        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RiskTrigger;
    use crate::events::EventBus;
    use crate::journal::InMemoryJournal;
    use chrono::{DateTime, Utc};
    use constitution::RequirementSpec;

    fn decision(result: RuleResult, required: Vec<ApprovalRequirement>) -> Decision {
        Decision {
            result,
            matched_rule_ids: vec!["sop-1".to_string()],
            layer_verdicts: vec![],
            required_approvals: required,
            denied_by: None,
            fail_closed: false,
            warnings: vec![],
            snapshot_version: 4,
            snapshot_hash: "abc".to_string(),
        }
    }

    fn orchestrator(clock: Arc<ManualClock>) -> ApprovalOrchestrator {
        let store = Arc::new(RequestStore::new(
            Arc::new(InMemoryJournal::new()),
            EventBus::default(),
            clock,
        ));
        let mut config = OrchestratorConfig::default();
        config.risk_triggers.insert(
            "surveillance".to_string(),
            RiskTrigger {
                threshold: 70,
                requirements: vec![
                    RequirementSpec::of(ApprovalType::Supervisor)
                        .with_minimum(2)
                        .with_timeout(20),
                    RequirementSpec::of(ApprovalType::LegalReview),
                ],
            },
        );
        ApprovalOrchestrator::new(config, RequirementCatalog::default(), store)
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn test_no_trigger_returns_none() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a1", "route", "patrol");
        let result = orchestrator
            .submit(&action, &decision(RuleResult::Allowed, vec![]), 10)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_review_without_tiers_fails_closed() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a5", "route", "patrol");
        let request = orchestrator
            .submit(&action, &decision(RuleResult::AllowedWithHumanReview, vec![]), 0)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(request.requirements.len(), 1);
        assert_eq!(request.requirements[0].approval_type, ApprovalType::SingleOperator);
        assert_eq!(request.requirements[0].minimum_approvals, 1);
        assert_eq!(request.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_triggers_union_and_merge() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a2", "camera_zoom", "surveillance");
        let review = decision(
            RuleResult::AllowedWithHumanReview,
            vec![ApprovalRequirement::new(ApprovalType::Supervisor, 1, true, 60).unwrap()],
        );

        let request = orchestrator
            .submit(&action, &review, 75)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(request.requirements.len(), 2);
        let supervisor = request.requirement(ApprovalType::Supervisor).unwrap();
        assert_eq!(supervisor.minimum_approvals, 2);
        assert!(supervisor.requires_mfa);
        assert_eq!(supervisor.timeout_minutes, 20);

        // Longest tier window: legal review's 240 minutes
        assert_eq!(request.expires_at, start() + Duration::minutes(240));
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.snapshot_version, 4);
    }

    #[tokio::test]
    async fn test_risk_trigger_alone_creates_request() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a3", "route", "patrol");
        let request = orchestrator
            .submit(&action, &decision(RuleResult::Allowed, vec![]), 90)
            .await
            .unwrap()
            .unwrap();
        // Default trigger
        assert_eq!(request.requirements[0].approval_type, ApprovalType::Supervisor);
    }

    #[tokio::test]
    async fn test_denied_decision_never_creates_request() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a4", "camera_zoom", "surveillance");
        let result = orchestrator
            .submit(&action, &decision(RuleResult::Denied, vec![]), 100)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_risk_score_bounds() {
        let orchestrator = orchestrator(Arc::new(ManualClock::new(start())));
        let action = ActionProposal::new("a5", "route", "patrol");
        assert!(matches!(
            orchestrator.plan(&action, &decision(RuleResult::Allowed, vec![]), 101),
            Err(ApprovalError::InvalidRiskScore(101))
        ));
    }
}
