//! Rule condition predicates.
//!
//! A rule's condition is a predicate identifier. Identifiers resolve, in
//! order, to the literals `always`/`never`, a `!`-negated identifier, a
//! registered [`Predicate`], or the truthiness of the context fact with that
//! name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

/// Named facts an action is evaluated against.
pub type Context = BTreeMap<String, Value>;

/// A custom predicate over the action context.
///
/// Implementations must be pure: evaluation is a deterministic function of
/// the context so identical inputs always produce identical decisions.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, context: &Context) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Context) -> bool + Send + Sync,
{
    fn evaluate(&self, context: &Context) -> bool {
        self(context)
    }
}

/// Registry of named predicates.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<dyn Predicate>>,
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("PredicateRegistry")
            .field("predicates", &names)
            .finish()
    }
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate under a name. Replaces any previous entry.
    pub fn register(&mut self, name: impl Into<String>, predicate: impl Predicate + 'static) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        self.register(name, predicate);
        self
    }

    /// Evaluate a condition identifier against a context.
    pub fn evaluate(&self, condition: &str, context: &Context) -> bool {
        let condition = condition.trim();
        match condition {
            "" | "always" => return true,
            "never" => return false,
            _ => {}
        }

        if let Some(inner) = condition.strip_prefix('!') {
            return !self.evaluate(inner, context);
        }

        match self.predicates.get(condition) {
            Some(predicate) => predicate.evaluate(context),
            None => context.get(condition).map(is_truthy).unwrap_or(false),
        }
    }
}

/// Truthiness of a context fact.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.insert("night_operation".into(), json!(true));
        ctx.insert("crowd_size".into(), json!(1200));
        ctx.insert("zone".into(), json!(""));
        ctx
    }

    #[test]
    fn test_literals_and_negation() {
        let registry = PredicateRegistry::new();
        let ctx = context();
        assert!(registry.evaluate("always", &ctx));
        assert!(!registry.evaluate("never", &ctx));
        assert!(registry.evaluate("!never", &ctx));
        assert!(!registry.evaluate("!night_operation", &ctx));
    }

    #[test]
    fn test_fact_truthiness() {
        let registry = PredicateRegistry::new();
        let ctx = context();
        assert!(registry.evaluate("night_operation", &ctx));
        assert!(registry.evaluate("crowd_size", &ctx));
        assert!(!registry.evaluate("zone", &ctx));
        assert!(!registry.evaluate("missing_fact", &ctx));
    }

    #[test]
    fn test_registered_predicate_wins_over_fact() {
        let registry = PredicateRegistry::new().with("large_crowd", |ctx: &Context| {
            ctx.get("crowd_size")
                .and_then(Value::as_u64)
                .map(|n| n >= 1000)
                .unwrap_or(false)
        });
        let ctx = context();
        assert!(registry.evaluate("large_crowd", &ctx));
        assert!(!registry.evaluate("!large_crowd", &ctx));
    }
}
