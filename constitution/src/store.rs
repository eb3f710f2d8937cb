//! Rule store: immutable, versioned snapshots of the constitution.
//!
//! Readers pin one [`RuleSnapshot`] per evaluation. Publishing a new rule
//! document builds a fresh snapshot off to the side and swaps it in
//! atomically, so no evaluation ever sees a mix of old and new layers.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::conflict::ConflictDetector;
use crate::error::ConstitutionError;
use crate::types::{ConstitutionalLayer, ConstitutionalRule, RuleDocument};

/// A validated rule set grouped by layer.
///
/// Within each layer rules are ordered by priority descending, ties broken by
/// `rule_id` lexical order.
#[derive(Debug, Default)]
pub struct RuleSet {
    by_layer: BTreeMap<ConstitutionalLayer, Vec<ConstitutionalRule>>,
    document_version: String,
    hash: String,
}

impl RuleSet {
    /// Validate and index a rule document.
    pub fn build(document: RuleDocument) -> Result<Self, ConstitutionError> {
        let mut seen = HashSet::new();
        for rule in &document.rules {
            if rule.rule_id.trim().is_empty() {
                return Err(ConstitutionError::InvalidRule {
                    rule_id: rule.rule_id.clone(),
                    reason: "rule_id must not be empty".to_string(),
                });
            }
            if !seen.insert(rule.rule_id.as_str()) {
                return Err(ConstitutionError::DuplicateRuleId(rule.rule_id.clone()));
            }
            if rule.action_categories.is_empty() {
                return Err(ConstitutionError::InvalidRule {
                    rule_id: rule.rule_id.clone(),
                    reason: "action_categories must not be empty".to_string(),
                });
            }
        }

        let hash = hash_rules(&document);

        let mut by_layer: BTreeMap<ConstitutionalLayer, Vec<ConstitutionalRule>> = BTreeMap::new();
        for rule in document.rules {
            by_layer.entry(rule.layer).or_default().push(rule);
        }
        for rules in by_layer.values_mut() {
            rules.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.rule_id.cmp(&b.rule_id))
            });
        }

        Ok(Self {
            by_layer,
            document_version: document.version,
            hash,
        })
    }

    /// Rules of one layer in evaluation order.
    pub fn layer(&self, layer: ConstitutionalLayer) -> &[ConstitutionalRule] {
        self.by_layer.get(&layer).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All rules, highest layer first, each layer in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &ConstitutionalRule> {
        ConstitutionalLayer::all_descending()
            .into_iter()
            .flat_map(move |layer| self.layer(layer).iter())
    }

    /// Whether any active rule governs the category.
    pub fn governs_category(&self, category: &str) -> bool {
        self.iter().any(|r| r.is_active && r.governs(category))
    }

    pub fn len(&self) -> usize {
        self.by_layer.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable, versioned view of the rule set.
#[derive(Debug)]
pub struct RuleSnapshot {
    /// Monotonic publish counter, 0 for the empty initial snapshot
    pub version: u64,
    /// When this snapshot was published
    pub loaded_at: DateTime<Utc>,
    rules: Arc<RuleSet>,
}

impl RuleSnapshot {
    /// Build a standalone snapshot, e.g. for tests or one-shot evaluation.
    pub fn new(version: u64, rules: RuleSet) -> Self {
        Self {
            version,
            loaded_at: Utc::now(),
            rules: Arc::new(rules),
        }
    }

    /// Build a standalone snapshot straight from a rule list.
    pub fn from_rules(rules: Vec<ConstitutionalRule>) -> Result<Self, ConstitutionError> {
        let set = RuleSet::build(RuleDocument {
            version: String::new(),
            rules,
        })?;
        Ok(Self::new(1, set))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// SHA-256 of the rule content, for audit
    pub fn hash(&self) -> &str {
        &self.rules.hash
    }

    /// Author-assigned version label of the source document
    pub fn document_version(&self) -> &str {
        &self.rules.document_version
    }
}

/// Hot-reloadable holder of the current rule snapshot.
pub struct RuleStore {
    current: ArcSwap<RuleSnapshot>,
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("RuleStore")
            .field("version", &snapshot.version)
            .field("hash", &snapshot.hash())
            .field("rules", &snapshot.rules().len())
            .finish()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// Create an empty store at version 0.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleSnapshot::new(0, RuleSet::default())),
        }
    }

    /// Create a store and publish an initial document.
    pub fn with_document(document: RuleDocument) -> Result<Self, ConstitutionError> {
        let store = Self::new();
        store.publish(document)?;
        Ok(store)
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Validate a document and publish it as the next snapshot.
    ///
    /// On validation failure the current snapshot stays in place.
    pub fn publish(&self, document: RuleDocument) -> Result<Arc<RuleSnapshot>, ConstitutionError> {
        let rules = Arc::new(RuleSet::build(document)?);

        for conflict in ConflictDetector::new().detect(&rules) {
            warn!(
                layer = %conflict.layer,
                priority = conflict.priority,
                rules = ?conflict.rule_ids,
                categories = ?conflict.categories,
                "Same-priority rules disagree; rule_id order will decide"
            );
        }

        let loaded_at = Utc::now();
        self.current.rcu(|current| RuleSnapshot {
            version: current.version + 1,
            loaded_at,
            rules: Arc::clone(&rules),
        });

        let snapshot = self.snapshot();
        info!(
            version = snapshot.version,
            document_version = %snapshot.document_version(),
            hash = %snapshot.hash(),
            rules = snapshot.rules().len(),
            "Published rule snapshot"
        );
        Ok(snapshot)
    }

    /// Load a YAML rule document from disk and publish it.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<RuleSnapshot>, ConstitutionError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.publish(RuleDocument::from_yaml(&content)?)
    }

    /// Reload the file if its rule content differs from the current snapshot.
    ///
    /// Returns the new snapshot when one was published.
    pub async fn reload_if_changed(
        &self,
        path: &Path,
    ) -> Result<Option<Arc<RuleSnapshot>>, ConstitutionError> {
        let content = tokio::fs::read_to_string(path).await?;
        let document = RuleDocument::from_yaml(&content)?;
        if hash_rules(&document) == self.snapshot().hash() {
            debug!(path = %path.display(), "Rule file unchanged");
            return Ok(None);
        }
        self.publish(document).map(Some)
    }

    /// Poll a rule file and hot-reload it until `shutdown` flips to true.
    pub async fn watch_file(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(path = %path.display(), interval_secs = interval.as_secs(), "Watching rule file");
        let mut tick = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reload_if_changed(&path).await {
                        warn!(path = %path.display(), error = %e, "Rule reload failed, keeping previous snapshot");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Rule watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Hash the rule content of a document deterministically.
///
/// Rules are hashed in `rule_id` order so reordering a document does not
/// count as a change.
fn hash_rules(document: &RuleDocument) -> String {
    let mut rules: Vec<&ConstitutionalRule> = document.rules.iter().collect();
    rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

    let mut hasher = Sha256::new();
    hasher.update(document.version.as_bytes());
    for rule in rules {
        // Struct fields serialize in declaration order and sets are sorted
        let encoded = serde_json::to_vec(rule).unwrap_or_default();
        hasher.update(&encoded);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleResult;

    fn rule(id: &str, layer: ConstitutionalLayer, priority: i32) -> ConstitutionalRule {
        ConstitutionalRule {
            rule_id: id.to_string(),
            layer,
            condition: "always".to_string(),
            action_categories: ["patrol".to_string()].into_iter().collect(),
            result: RuleResult::Allowed,
            priority,
            source_documents: vec![],
            rationale: String::new(),
            exceptions: Default::default(),
            is_active: true,
            review_approval_type: None,
        }
    }

    fn document(rules: Vec<ConstitutionalRule>) -> RuleDocument {
        RuleDocument {
            version: "test".to_string(),
            rules,
        }
    }

    #[test]
    fn test_layer_ordering_and_tiebreak() {
        let set = RuleSet::build(document(vec![
            rule("b-rule", ConstitutionalLayer::AgencySop, 5),
            rule("a-rule", ConstitutionalLayer::AgencySop, 5),
            rule("top", ConstitutionalLayer::AgencySop, 9),
        ]))
        .unwrap();

        let ids: Vec<_> = set
            .layer(ConstitutionalLayer::AgencySop)
            .iter()
            .map(|r| r.rule_id.as_str())
            .collect();
        assert_eq!(ids, vec!["top", "a-rule", "b-rule"]);
    }

    #[test]
    fn test_duplicate_rule_id_rejected() {
        let err = RuleSet::build(document(vec![
            rule("dup", ConstitutionalLayer::Ethics, 1),
            rule("dup", ConstitutionalLayer::Autonomy, 1),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConstitutionError::DuplicateRuleId(id) if id == "dup"));
    }

    #[test]
    fn test_publish_bumps_version_and_keeps_old_snapshot() {
        let store = RuleStore::new();
        assert_eq!(store.snapshot().version, 0);

        store
            .publish(document(vec![rule("one", ConstitutionalLayer::Ethics, 1)]))
            .unwrap();
        let pinned = store.snapshot();
        assert_eq!(pinned.version, 1);

        store
            .publish(document(vec![
                rule("one", ConstitutionalLayer::Ethics, 1),
                rule("two", ConstitutionalLayer::Autonomy, 1),
            ]))
            .unwrap();

        // A pinned reader keeps its view
        assert_eq!(pinned.rules().len(), 1);
        assert_eq!(store.snapshot().version, 2);
        assert_eq!(store.snapshot().rules().len(), 2);
    }

    #[test]
    fn test_failed_publish_keeps_current() {
        let store = RuleStore::with_document(document(vec![rule(
            "one",
            ConstitutionalLayer::Ethics,
            1,
        )]))
        .unwrap();
        let before = store.snapshot().hash().to_string();

        assert!(store
            .publish(document(vec![
                rule("x", ConstitutionalLayer::Ethics, 1),
                rule("x", ConstitutionalLayer::Ethics, 2),
            ]))
            .is_err());
        assert_eq!(store.snapshot().hash(), before);
        assert_eq!(store.snapshot().version, 1);
    }

    #[test]
    fn test_hash_ignores_rule_order() {
        let a = document(vec![
            rule("one", ConstitutionalLayer::Ethics, 1),
            rule("two", ConstitutionalLayer::Autonomy, 1),
        ]);
        let b = document(vec![
            rule("two", ConstitutionalLayer::Autonomy, 1),
            rule("one", ConstitutionalLayer::Ethics, 1),
        ]);
        assert_eq!(hash_rules(&a), hash_rules(&b));
    }

    #[tokio::test]
    async fn test_reload_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");

        let doc = document(vec![rule("one", ConstitutionalLayer::Ethics, 1)]);
        std::fs::write(&path, doc.to_yaml().unwrap()).unwrap();

        let store = RuleStore::new();
        assert!(store.reload_if_changed(&path).await.unwrap().is_some());
        assert!(store.reload_if_changed(&path).await.unwrap().is_none());

        let doc = document(vec![rule("one", ConstitutionalLayer::Ethics, 2)]);
        std::fs::write(&path, doc.to_yaml().unwrap()).unwrap();
        let snapshot = store.reload_if_changed(&path).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 2);
    }
}
