//! Governance service.
//!
//! Wires the rule store, evaluator and approval workflow together behind
//! one handle. This is the surface the workflow API and the CLI drive.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use constitution::{
    ActionProposal, ConstitutionEvaluator, Decision, EvaluationWarning, PredicateRegistry,
    RequirementSpec, RuleStore,
};

use crate::clock::Clock;
use crate::config::ApprovalConfig;
use crate::escalation::EscalationManager;
use crate::events::{ApprovalEvent, EventBus};
use crate::journal::RequestJournal;
use crate::ledger::SignatureLedger;
use crate::orchestrator::ApprovalOrchestrator;
use crate::store::{RequestFilter, RequestStore};
use crate::sweeper::{ExpirationSweeper, SweepReport};
use crate::types::{ApprovalRequest, EscalationTrigger, Result, SignatureSubmission};

/// Outcome of proposing an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub decision: Decision,
    /// Request to sign, when the action needs human review
    pub request: Option<ApprovalRequest>,
}

/// Facade over evaluation and the approval workflow.
pub struct GovernanceService {
    rules: Arc<RuleStore>,
    evaluator: ConstitutionEvaluator,
    store: Arc<RequestStore>,
    orchestrator: ApprovalOrchestrator,
    ledger: SignatureLedger,
    escalation: Arc<EscalationManager>,
    sweeper: Arc<ExpirationSweeper>,
}

impl GovernanceService {
    pub fn new(
        config: ApprovalConfig,
        rules: Arc<RuleStore>,
        journal: Arc<dyn RequestJournal>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(RequestStore::new(journal, EventBus::default(), clock));
        let evaluator = ConstitutionEvaluator::with_config(config.evaluator, config.catalog.clone());
        let orchestrator = ApprovalOrchestrator::new(
            config.orchestrator,
            config.catalog.clone(),
            store.clone(),
        );
        let ledger = SignatureLedger::new(store.clone(), config.authorization.clone());
        let escalation = Arc::new(EscalationManager::new(
            store.clone(),
            config.catalog,
            config.authorization,
        ));
        let sweeper = Arc::new(ExpirationSweeper::new(
            store.clone(),
            escalation.clone(),
            config.sweeper,
        ));

        Ok(Self {
            rules,
            evaluator,
            store,
            orchestrator,
            ledger,
            escalation,
            sweeper,
        })
    }

    /// Builder: install custom rule predicates.
    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.evaluator = self.evaluator.with_predicates(predicates);
        self
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Replay the journal into memory.
    pub async fn restore(&self) -> Result<usize> {
        self.store.restore().await
    }

    /// Evaluate an action against the current rule snapshot.
    pub fn evaluate(&self, action: &ActionProposal) -> Decision {
        let snapshot = self.rules.snapshot();
        let decision = self.evaluator.evaluate(&snapshot, action);

        for warning in &decision.warnings {
            match warning {
                EvaluationWarning::UnknownActionCategory { category } => warn!(
                    action_id = %action.action_id,
                    category = %category,
                    "No rule governs action category; fail-closed default applied"
                ),
                EvaluationWarning::NoMatchingRule { category } => warn!(
                    action_id = %action.action_id,
                    category = %category,
                    "No rule condition matched; fail-closed default applied"
                ),
                EvaluationWarning::EvaluationTieBreak {
                    layer,
                    priority,
                    winner,
                    contenders,
                } => warn!(
                    action_id = %action.action_id,
                    layer = %layer,
                    priority,
                    winner = %winner,
                    contenders = ?contenders,
                    "Same-priority rules disagree; resolved by rule_id order"
                ),
            }
        }

        info!(
            action_id = %action.action_id,
            category = %action.action_category,
            result = %decision.result,
            matched = ?decision.matched_rule_ids,
            snapshot_version = decision.snapshot_version,
            "Action evaluated"
        );
        decision
    }

    /// Evaluate an action and open an approval request if one is needed.
    pub async fn propose(&self, action: &ActionProposal, risk_score: u8) -> Result<Proposal> {
        let decision = self.evaluate(action);
        let request = self.orchestrator.submit(action, &decision, risk_score).await?;
        Ok(Proposal { decision, request })
    }

    /// Open a request for an already-evaluated decision.
    pub async fn submit(
        &self,
        action: &ActionProposal,
        decision: &Decision,
        risk_score: u8,
    ) -> Result<Option<ApprovalRequest>> {
        self.orchestrator.submit(action, decision, risk_score).await
    }

    pub async fn get(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.store.get(request_id).await
    }

    pub async fn list(&self, filter: &RequestFilter) -> Vec<ApprovalRequest> {
        self.store.list(filter).await
    }

    /// Open requests the approver could sign right now.
    pub async fn signable_by(&self, approver_id: &str, approver_role: &str) -> Vec<ApprovalRequest> {
        self.store
            .list(&RequestFilter::open())
            .await
            .into_iter()
            .filter(|r| self.ledger.can_sign(r, approver_id, approver_role))
            .collect()
    }

    pub fn can_sign(&self, request: &ApprovalRequest, approver_id: &str, approver_role: &str) -> bool {
        self.ledger.can_sign(request, approver_id, approver_role)
    }

    pub async fn sign(&self, request_id: &str, submission: SignatureSubmission) -> Result<ApprovalRequest> {
        self.ledger.record_signature(request_id, submission).await
    }

    /// Manually escalate a request on behalf of an approver.
    pub async fn escalate(
        &self,
        request_id: &str,
        spec: &RequirementSpec,
        actor_id: &str,
        actor_role: &str,
    ) -> Result<ApprovalRequest> {
        let trigger = EscalationTrigger::Manual {
            actor_id: actor_id.to_string(),
            actor_role: actor_role.to_string(),
        };
        self.escalation.escalate_spec(request_id, spec, trigger).await
    }

    pub async fn cancel(
        &self,
        request_id: &str,
        actor_id: &str,
        actor_role: &str,
        mfa_verified: bool,
        reason: &str,
    ) -> Result<ApprovalRequest> {
        self.ledger
            .cancel(request_id, actor_id, actor_role, mfa_verified, reason)
            .await
    }

    /// Run one expiry pass now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweeper.sweep().await
    }

    /// Start the background sweeper.
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.sweeper.clone().spawn(shutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.store.events().subscribe()
    }
}
