//! Static conflict detection between rules.
//!
//! Two rules in the same layer with the same priority that govern a shared
//! category but return different verdicts are an authoring error: the
//! evaluator will still decide deterministically by `rule_id`, but rule
//! authors should be told.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::RuleSet;
use crate::types::{ConstitutionalLayer, ConstitutionalRule};

/// A group of same-layer, same-priority rules that disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub layer: ConstitutionalLayer,
    pub priority: i32,
    /// Conflicting rules, in the order the evaluator will try them
    pub rule_ids: Vec<String>,
    /// Categories governed by more than one of the rules
    pub categories: BTreeSet<String>,
}

/// Finds same-priority disagreements in a rule set.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    /// Whether retired rules are included in the scan
    include_inactive: bool,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report conflicts involving inactive rules.
    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    /// Scan every layer of a rule set.
    pub fn detect(&self, rules: &RuleSet) -> Vec<RuleConflict> {
        let mut conflicts = Vec::new();

        for layer in ConstitutionalLayer::all_descending() {
            let candidates: Vec<&ConstitutionalRule> = rules
                .layer(layer)
                .iter()
                .filter(|r| self.include_inactive || r.is_active)
                .collect();

            // Rules are sorted by priority, so equal priorities are adjacent
            for group in candidates.chunk_by(|a, b| a.priority == b.priority) {
                if let Some(conflict) = Self::check_group(layer, group) {
                    conflicts.push(conflict);
                }
            }
        }

        conflicts
    }

    fn check_group(layer: ConstitutionalLayer, group: &[&ConstitutionalRule]) -> Option<RuleConflict> {
        let mut involved: BTreeSet<&str> = BTreeSet::new();
        let mut categories = BTreeSet::new();

        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                if a.result == b.result {
                    continue;
                }
                let shared: Vec<&String> = a.action_categories.intersection(&b.action_categories).collect();
                if shared.is_empty() {
                    continue;
                }
                involved.insert(&a.rule_id);
                involved.insert(&b.rule_id);
                categories.extend(shared.into_iter().cloned());
            }
        }

        if involved.is_empty() {
            return None;
        }

        Some(RuleConflict {
            layer,
            priority: group[0].priority,
            rule_ids: involved.into_iter().map(str::to_string).collect(),
            categories,
        })
    }
}
