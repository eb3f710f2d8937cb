//! Constitution evaluator.
//!
//! Walks the layers of a pinned [`RuleSnapshot`] from highest to lowest
//! precedence and folds the per-layer verdicts into one [`Decision`]:
//!
//! - a `denied` verdict stops evaluation immediately;
//! - an `allowed_with_human_review` verdict adds its approval tier and continues;
//! - an `allowed` verdict continues without adding anything.
//!
//! Evaluation is a pure function of the snapshot, the action and the
//! evaluator configuration. Loading rules happens before, logging after.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::RequirementCatalog;
use crate::predicate::PredicateRegistry;
use crate::store::RuleSnapshot;
use crate::types::*;

/// What to do when no layer produces a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Fail closed
    #[default]
    Deny,
    /// Fail open
    Allow,
    /// Let a human decide
    RequireReview { approval_type: ApprovalType },
}

/// Evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Outcome for actions no rule matches
    pub unmatched: UnmatchedPolicy,
    /// Review tier demanded by a layer when the rule names none
    pub layer_review_types: BTreeMap<ConstitutionalLayer, ApprovalType>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        let layer_review_types = [
            (ConstitutionalLayer::FederalConstitutional, ApprovalType::LegalReview),
            (ConstitutionalLayer::StateConstitutional, ApprovalType::LegalReview),
            (ConstitutionalLayer::Statutory, ApprovalType::LegalReview),
            (ConstitutionalLayer::LocalOrdinance, ApprovalType::CityManager),
            (ConstitutionalLayer::AgencySop, ApprovalType::Supervisor),
            (ConstitutionalLayer::Ethics, ApprovalType::CommandStaff),
            (ConstitutionalLayer::Autonomy, ApprovalType::SingleOperator),
        ]
        .into_iter()
        .collect();

        Self {
            unmatched: UnmatchedPolicy::Deny,
            layer_review_types,
        }
    }
}

impl EvaluatorConfig {
    /// Review tier for a rule's review verdict.
    pub fn review_type_for(&self, rule: &ConstitutionalRule) -> ApprovalType {
        rule.review_approval_type.unwrap_or_else(|| {
            self.layer_review_types
                .get(&rule.layer)
                .copied()
                .unwrap_or(ApprovalType::Supervisor)
        })
    }
}

/// Evaluates proposed actions against constitutional rule snapshots.
#[derive(Debug, Clone, Default)]
pub struct ConstitutionEvaluator {
    config: EvaluatorConfig,
    catalog: RequirementCatalog,
    predicates: PredicateRegistry,
}

impl ConstitutionEvaluator {
    /// Create an evaluator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration.
    pub fn with_config(config: EvaluatorConfig, catalog: RequirementCatalog) -> Self {
        Self {
            config,
            catalog,
            predicates: PredicateRegistry::new(),
        }
    }

    /// Builder: install a predicate registry.
    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &RequirementCatalog {
        &self.catalog
    }

    /// Evaluate an action against a snapshot.
    pub fn evaluate(&self, snapshot: &RuleSnapshot, action: &ActionProposal) -> Decision {
        let rules = snapshot.rules();
        let category = action.action_category.as_str();

        let mut decision = Decision {
            result: RuleResult::Allowed,
            matched_rule_ids: Vec::new(),
            layer_verdicts: Vec::new(),
            required_approvals: Vec::new(),
            denied_by: None,
            fail_closed: false,
            warnings: Vec::new(),
            snapshot_version: snapshot.version,
            snapshot_hash: snapshot.hash().to_string(),
        };

        let mut review_required = false;

        for layer in ConstitutionalLayer::all_descending() {
            let Some(rule) = self.layer_verdict(rules.layer(layer), action, &mut decision.warnings)
            else {
                continue;
            };

            decision.matched_rule_ids.push(rule.rule_id.clone());
            decision.layer_verdicts.push(LayerVerdict {
                layer,
                rule_id: rule.rule_id.clone(),
                result: rule.result,
            });

            match rule.result {
                RuleResult::Denied => {
                    // Higher layers are supreme: nothing below may loosen this
                    decision.result = RuleResult::Denied;
                    decision.denied_by = Some(rule.rule_id.clone());
                    decision.required_approvals.clear();
                    return decision;
                }
                RuleResult::AllowedWithHumanReview => {
                    review_required = true;
                    let approval_type = self.config.review_type_for(rule);
                    merge_requirement(
                        &mut decision.required_approvals,
                        self.catalog.requirement(approval_type),
                    );
                }
                RuleResult::Allowed => {}
            }
        }

        if decision.layer_verdicts.is_empty() {
            self.apply_unmatched(&mut decision, rules.governs_category(category), category);
            return decision;
        }

        if review_required {
            decision.result = RuleResult::AllowedWithHumanReview;
        }
        decision
    }

    /// First matching rule of one layer, recording tie-break warnings.
    fn layer_verdict<'a>(
        &self,
        layer_rules: &'a [ConstitutionalRule],
        action: &ActionProposal,
        warnings: &mut Vec<EvaluationWarning>,
    ) -> Option<&'a ConstitutionalRule> {
        let category = action.action_category.as_str();
        let mut candidates = layer_rules
            .iter()
            .filter(|r| r.is_active && r.governs(category))
            .filter(|r| r.active_exception(&action.active_exceptions).is_none());

        let winner = candidates
            .by_ref()
            .find(|r| self.predicates.evaluate(&r.condition, &action.context))?;

        // Candidates are priority-descending, so same-priority rivals follow directly
        let contenders: Vec<String> = candidates
            .take_while(|r| r.priority == winner.priority)
            .filter(|r| r.result != winner.result)
            .filter(|r| self.predicates.evaluate(&r.condition, &action.context))
            .map(|r| r.rule_id.clone())
            .collect();

        if !contenders.is_empty() {
            warnings.push(EvaluationWarning::EvaluationTieBreak {
                layer: winner.layer,
                priority: winner.priority,
                winner: winner.rule_id.clone(),
                contenders,
            });
        }

        Some(winner)
    }

    fn apply_unmatched(&self, decision: &mut Decision, governed: bool, category: &str) {
        decision.warnings.push(if governed {
            EvaluationWarning::NoMatchingRule {
                category: category.to_string(),
            }
        } else {
            EvaluationWarning::UnknownActionCategory {
                category: category.to_string(),
            }
        });

        decision.fail_closed = true;
        match self.config.unmatched {
            UnmatchedPolicy::Deny => decision.result = RuleResult::Denied,
            UnmatchedPolicy::Allow => decision.result = RuleResult::Allowed,
            UnmatchedPolicy::RequireReview { approval_type } => {
                decision.result = RuleResult::AllowedWithHumanReview;
                decision
                    .required_approvals
                    .push(self.catalog.requirement(approval_type));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Context;

    fn rule(
        id: &str,
        layer: ConstitutionalLayer,
        condition: &str,
        category: &str,
        result: RuleResult,
        priority: i32,
    ) -> ConstitutionalRule {
        ConstitutionalRule {
            rule_id: id.to_string(),
            layer,
            condition: condition.to_string(),
            action_categories: [category.to_string()].into_iter().collect(),
            result,
            priority,
            source_documents: vec![format!("{id}-citation")],
            rationale: String::new(),
            exceptions: Default::default(),
            is_active: true,
            review_approval_type: None,
        }
    }

    fn crowd_action() -> ActionProposal {
        ActionProposal::new("act-1", "dispersal_order", "crowd_management")
            .with_fact("action_restricts_speech_or_assembly", true)
    }

    #[test]
    fn test_higher_layer_denial_is_supreme() {
        let snapshot = RuleSnapshot::from_rules(vec![
            rule(
                "fed-1a",
                ConstitutionalLayer::FederalConstitutional,
                "action_restricts_speech_or_assembly",
                "crowd_management",
                RuleResult::Denied,
                100,
            ),
            rule(
                "sop-crowd",
                ConstitutionalLayer::AgencySop,
                "always",
                "crowd_management",
                RuleResult::Allowed,
                1000,
            ),
        ])
        .unwrap();

        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &crowd_action());
        assert_eq!(decision.result, RuleResult::Denied);
        assert_eq!(decision.denied_by.as_deref(), Some("fed-1a"));
        assert_eq!(decision.matched_rule_ids, vec!["fed-1a"]);
        assert!(decision.required_approvals.is_empty());
    }

    #[test]
    fn test_lower_layer_can_deny_after_higher_allows() {
        let snapshot = RuleSnapshot::from_rules(vec![
            rule("statute", ConstitutionalLayer::Statutory, "always", "patrol", RuleResult::Allowed, 1),
            rule("ethics", ConstitutionalLayer::Ethics, "always", "patrol", RuleResult::Denied, 1),
        ])
        .unwrap();

        let action = ActionProposal::new("act-2", "route", "patrol");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);
        assert!(decision.is_denied());
        assert_eq!(decision.matched_rule_ids, vec!["statute", "ethics"]);
    }

    #[test]
    fn test_review_requirements_accumulate() {
        let mut sop = rule(
            "sop-review",
            ConstitutionalLayer::AgencySop,
            "always",
            "surveillance",
            RuleResult::AllowedWithHumanReview,
            1,
        );
        sop.review_approval_type = Some(ApprovalType::CommandStaff);

        let snapshot = RuleSnapshot::from_rules(vec![
            rule(
                "ordinance-review",
                ConstitutionalLayer::LocalOrdinance,
                "always",
                "surveillance",
                RuleResult::AllowedWithHumanReview,
                1,
            ),
            sop,
            rule("autonomy-ok", ConstitutionalLayer::Autonomy, "always", "surveillance", RuleResult::Allowed, 1),
        ])
        .unwrap();

        let action = ActionProposal::new("act-3", "camera_zoom", "surveillance");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);

        assert!(decision.requires_review());
        let types: Vec<_> = decision
            .required_approvals
            .iter()
            .map(|r| r.approval_type)
            .collect();
        assert_eq!(types, vec![ApprovalType::CityManager, ApprovalType::CommandStaff]);
        assert_eq!(
            decision.matched_rule_ids,
            vec!["ordinance-review", "sop-review", "autonomy-ok"]
        );
    }

    #[test]
    fn test_fail_closed_for_unknown_category() {
        let snapshot = RuleSnapshot::from_rules(vec![rule(
            "patrol-ok",
            ConstitutionalLayer::AgencySop,
            "always",
            "patrol",
            RuleResult::Allowed,
            1,
        )])
        .unwrap();

        let action = ActionProposal::new("act-4", "launch", "orbital_strike");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);
        assert!(decision.is_denied());
        assert!(decision.fail_closed);
        assert_eq!(
            decision.warnings,
            vec![EvaluationWarning::UnknownActionCategory {
                category: "orbital_strike".to_string()
            }]
        );
    }

    #[test]
    fn test_unmatched_condition_reports_no_matching_rule() {
        let snapshot = RuleSnapshot::from_rules(vec![rule(
            "night-only",
            ConstitutionalLayer::AgencySop,
            "night_operation",
            "patrol",
            RuleResult::Allowed,
            1,
        )])
        .unwrap();

        let action = ActionProposal::new("act-5", "route", "patrol");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);
        assert!(decision.is_denied());
        assert!(matches!(
            decision.warnings[0],
            EvaluationWarning::NoMatchingRule { .. }
        ));
    }

    #[test]
    fn test_unmatched_policy_is_configurable() {
        let snapshot = RuleSnapshot::from_rules(vec![]).unwrap();
        let action = ActionProposal::new("act-6", "route", "patrol");

        let config = EvaluatorConfig {
            unmatched: UnmatchedPolicy::RequireReview {
                approval_type: ApprovalType::Supervisor,
            },
            ..Default::default()
        };
        let evaluator = ConstitutionEvaluator::with_config(config, RequirementCatalog::default());
        let decision = evaluator.evaluate(&snapshot, &action);
        assert!(decision.requires_review());
        assert_eq!(decision.required_approvals[0].approval_type, ApprovalType::Supervisor);
    }

    #[test]
    fn test_exception_skips_rule() {
        let mut fed = rule(
            "fed-1a",
            ConstitutionalLayer::FederalConstitutional,
            "action_restricts_speech_or_assembly",
            "crowd_management",
            RuleResult::Denied,
            1,
        );
        fed.exceptions.insert("imminent_threat_to_life".to_string());

        let snapshot = RuleSnapshot::from_rules(vec![
            fed,
            rule(
                "sop-crowd",
                ConstitutionalLayer::AgencySop,
                "always",
                "crowd_management",
                RuleResult::AllowedWithHumanReview,
                1,
            ),
        ])
        .unwrap();

        let action = crowd_action().with_exception("imminent_threat_to_life");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);
        assert!(decision.requires_review());
        assert_eq!(decision.matched_rule_ids, vec!["sop-crowd"]);
    }

    #[test]
    fn test_tie_break_by_rule_id_with_warning() {
        let snapshot = RuleSnapshot::from_rules(vec![
            rule("b-deny", ConstitutionalLayer::Ethics, "always", "patrol", RuleResult::Denied, 5),
            rule("a-allow", ConstitutionalLayer::Ethics, "always", "patrol", RuleResult::Allowed, 5),
        ])
        .unwrap();

        let action = ActionProposal::new("act-7", "route", "patrol");
        let decision = ConstitutionEvaluator::new().evaluate(&snapshot, &action);

        assert_eq!(decision.result, RuleResult::Allowed);
        assert_eq!(
            decision.warnings,
            vec![EvaluationWarning::EvaluationTieBreak {
                layer: ConstitutionalLayer::Ethics,
                priority: 5,
                winner: "a-allow".to_string(),
                contenders: vec!["b-deny".to_string()],
            }]
        );
    }

    #[test]
    fn test_registered_predicate() {
        let snapshot = RuleSnapshot::from_rules(vec![rule(
            "big-crowd",
            ConstitutionalLayer::LocalOrdinance,
            "large_crowd",
            "crowd_management",
            RuleResult::Denied,
            1,
        )])
        .unwrap();

        let predicates = PredicateRegistry::new().with("large_crowd", |ctx: &Context| {
            ctx.get("crowd_size")
                .and_then(|v| v.as_u64())
                .is_some_and(|n| n > 500)
        });
        let evaluator = ConstitutionEvaluator::new().with_predicates(predicates);

        let small = ActionProposal::new("a", "t", "crowd_management").with_fact("crowd_size", 20);
        let large = ActionProposal::new("b", "t", "crowd_management").with_fact("crowd_size", 900);
        assert!(evaluator.evaluate(&snapshot, &small).fail_closed);
        assert!(evaluator.evaluate(&snapshot, &large).is_denied());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let snapshot = RuleSnapshot::from_rules(vec![
            rule("x", ConstitutionalLayer::Ethics, "always", "patrol", RuleResult::AllowedWithHumanReview, 1),
        ])
        .unwrap();
        let evaluator = ConstitutionEvaluator::new();
        let action = ActionProposal::new("act", "route", "patrol");
        assert_eq!(evaluator.evaluate(&snapshot, &action), evaluator.evaluate(&snapshot, &action));
    }
}
