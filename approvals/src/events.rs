//! Workflow events for notification subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ApprovalRequest, ApprovalStatus};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEventKind {
    Created,
    /// A signature was appended without closing the request
    Signed,
    Escalated,
    Approved,
    Denied,
    Expired,
}

impl ApprovalEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Signed => "signed",
            Self::Escalated => "escalated",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

/// A committed change to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub kind: ApprovalEventKind,
    pub request_id: String,
    pub action_category: String,
    pub status: ApprovalStatus,
    pub revision: u64,
    pub expires_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

impl ApprovalEvent {
    pub fn new(kind: ApprovalEventKind, request: &ApprovalRequest, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            request_id: request.request_id.clone(),
            action_category: request.action_category.clone(),
            status: request.status,
            revision: request.revision,
            expires_at: request.expires_at,
            at,
        }
    }
}

/// Broadcast fan-out of approval events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ApprovalEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ApprovalEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}
