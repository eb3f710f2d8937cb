//! Constitutional rule store and evaluator.
//!
//! This crate gates autonomous actions against a 7-layer constitutional
//! hierarchy, from most to least authority:
//!
//! - **Federal constitutional**: supreme, never loosened by lower layers
//! - **State constitutional**
//! - **Statutory**
//! - **Local ordinance**
//! - **Agency SOP**
//! - **Ethics**
//! - **Autonomy**: operational settings, least authority
//!
//! # Key Components
//!
//! - [`RuleStore`]: Hot-reloadable, versioned snapshots of the rule set
//! - [`ConstitutionEvaluator`]: Folds per-layer verdicts into a [`Decision`]
//! - [`RequirementCatalog`]: Quorum, MFA and deadline per approval tier
//! - [`PredicateRegistry`]: Resolves rule conditions against action context
//! - [`ConflictDetector`]: Flags same-priority rules that disagree
//!
//! # Example
//!
//! ```ignore
//! use constitution::{ActionProposal, ConstitutionEvaluator, RuleStore};
//!
//! let store = RuleStore::new();
//! store.load_file("rules.yaml")?;
//!
//! let action = ActionProposal::new("act-1", "dispersal_order", "crowd_management")
//!     .with_fact("action_restricts_speech_or_assembly", true);
//! let decision = ConstitutionEvaluator::new().evaluate(&store.snapshot(), &action);
//! assert!(decision.is_denied());
//! ```

pub mod catalog;
pub mod conflict;
pub mod error;
pub mod evaluator;
pub mod predicate;
pub mod store;
pub mod types;

// Re-export main types
pub use catalog::{RequirementCatalog, RequirementSpec};
pub use conflict::{ConflictDetector, RuleConflict};
pub use error::ConstitutionError;
pub use evaluator::{ConstitutionEvaluator, EvaluatorConfig, UnmatchedPolicy};
pub use predicate::{Context, Predicate, PredicateRegistry};
pub use store::{RuleSet, RuleSnapshot, RuleStore};
pub use types::*;

/// Result type for constitution operations
pub type Result<T> = std::result::Result<T, ConstitutionError>;
