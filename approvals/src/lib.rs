//! Human-in-the-loop approval workflow for gated autonomous actions.
//!
//! Takes the [`Decision`](constitution::Decision) produced by the
//! constitution evaluator and drives quorum-based human review:
//!
//! - **Orchestrator**: opens requests from review verdicts and risk triggers
//! - **Signature ledger**: records signatures and resolves quorum atomically
//! - **Escalation**: adds tiers to open requests, manually or on deadline pressure
//! - **Sweeper**: expires requests past their deadline
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      GovernanceService                       │
//! │                                                              │
//! │  action ─▶ Evaluator ─▶ Orchestrator ─▶ RequestStore ◀─┐     │
//! │                                            ▲    ▲      │     │
//! │                              SignatureLedger    │   Sweeper  │
//! │                                       EscalationManager      │
//! │                                                              │
//! │  RequestStore ─▶ RequestJournal (append-only)                │
//! │               ─▶ EventBus (notifications)                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod escalation;
pub mod events;
pub mod journal;
pub mod ledger;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod types;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ApprovalConfig, AuthorizationConfig, OrchestratorConfig, RiskTrigger, SweeperConfig};
pub use escalation::EscalationManager;
pub use events::{ApprovalEvent, ApprovalEventKind, EventBus};
pub use journal::{InMemoryJournal, JournalRecord, JsonlJournal, RequestJournal};
pub use ledger::SignatureLedger;
pub use orchestrator::ApprovalOrchestrator;
pub use service::{GovernanceService, Proposal};
pub use store::{RequestFilter, RequestStore};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use types::*;
