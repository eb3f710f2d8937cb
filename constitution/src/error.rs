//! Error types for rule store and catalog operations.

/// Error types for constitutional rule operations.
#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    /// Two rules in one document share an ID
    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(String),

    /// Rule failed validation
    #[error("Invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    /// Requirement failed validation
    #[error("Invalid approval requirement: {0}")]
    InvalidRequirement(String),

    /// Reading a rule document failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a rule document failed
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}
