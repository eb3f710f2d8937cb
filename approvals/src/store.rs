//! In-memory request store with per-request serialization.
//!
//! Each request lives behind its own async mutex, so signature recording,
//! escalation and expiry on one request are ordered while different
//! requests proceed in parallel. Mutations are applied to a draft copy,
//! journaled, and only then committed, so a journal failure leaves the
//! request untouched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::events::{ApprovalEvent, ApprovalEventKind, EventBus};
use crate::journal::{JournalRecord, RequestJournal};
use crate::types::{ApprovalError, ApprovalRequest, ApprovalStatus, Result};

/// Criteria for listing requests. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestFilter {
    pub statuses: BTreeSet<ApprovalStatus>,
    pub action_category: Option<String>,
}

impl RequestFilter {
    /// Requests still collecting signatures.
    pub fn open() -> Self {
        Self {
            statuses: [ApprovalStatus::Pending, ApprovalStatus::Escalated]
                .into_iter()
                .collect(),
            action_category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.action_category = Some(category.into());
        self
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&request.status))
            && self
                .action_category
                .as_ref()
                .map_or(true, |c| *c == request.action_category)
    }
}

/// Shared store of approval requests.
pub struct RequestStore {
    requests: DashMap<String, Arc<Mutex<ApprovalRequest>>>,
    journal: Arc<dyn RequestJournal>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl RequestStore {
    pub fn new(journal: Arc<dyn RequestJournal>, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: DashMap::new(),
            journal,
            events,
            clock,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Journal and register a new request.
    pub async fn insert(&self, mut request: ApprovalRequest) -> Result<ApprovalRequest> {
        request.revision = 1;
        self.commit_record(ApprovalEventKind::Created, &request).await?;

        self.requests.insert(
            request.request_id.clone(),
            Arc::new(Mutex::new(request.clone())),
        );
        self.events.publish(ApprovalEvent::new(
            ApprovalEventKind::Created,
            &request,
            self.clock.now(),
        ));
        Ok(request)
    }

    /// Current image of a request.
    pub async fn get(&self, request_id: &str) -> Result<ApprovalRequest> {
        let cell = self.cell(request_id)?;
        let request = cell.lock().await;
        Ok(request.clone())
    }

    /// Requests matching a filter, oldest first.
    pub async fn list(&self, filter: &RequestFilter) -> Vec<ApprovalRequest> {
        // Collect handles first so no shard guard is held across an await
        let cells: Vec<_> = self
            .requests
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut matching = Vec::new();
        for cell in cells {
            let request = cell.lock().await;
            if filter.matches(&request) {
                matching.push(request.clone());
            }
        }
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        matching
    }

    /// Apply a mutation under the request's lock.
    ///
    /// The closure edits a draft and names the event it produced. If it
    /// fails, or the journal append fails, nothing is committed.
    pub async fn update<F>(&self, request_id: &str, mutate: F) -> Result<ApprovalRequest>
    where
        F: FnOnce(&mut ApprovalRequest) -> Result<ApprovalEventKind>,
    {
        let cell = self.cell(request_id)?;
        let mut current = cell.lock().await;

        let mut draft = current.clone();
        let kind = mutate(&mut draft)?;
        draft.revision = current.revision + 1;

        self.commit_record(kind, &draft).await?;
        *current = draft.clone();
        drop(current);

        debug!(
            request_id = %draft.request_id,
            event = kind.as_str(),
            status = %draft.status,
            revision = draft.revision,
            "Request updated"
        );
        self.events
            .publish(ApprovalEvent::new(kind, &draft, self.clock.now()));
        Ok(draft)
    }

    /// Rebuild state from the journal, keeping the latest revision of each request.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.journal.load().await?;

        let mut latest: HashMap<String, ApprovalRequest> = HashMap::new();
        for record in records {
            let request = record.request;
            match latest.get(&request.request_id) {
                Some(existing) if existing.revision >= request.revision => {}
                _ => {
                    latest.insert(request.request_id.clone(), request);
                }
            }
        }

        let restored = latest.len();
        for (id, request) in latest {
            self.requests.insert(id, Arc::new(Mutex::new(request)));
        }

        info!(requests = restored, "Restored approval requests from journal");
        Ok(restored)
    }

    fn cell(&self, request_id: &str) -> Result<Arc<Mutex<ApprovalRequest>>> {
        self.requests
            .get(request_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ApprovalError::RequestNotFound(request_id.to_string()))
    }

    async fn commit_record(&self, event: ApprovalEventKind, request: &ApprovalRequest) -> Result<()> {
        self.journal
            .append(&JournalRecord {
                recorded_at: self.clock.now(),
                event,
                request: request.clone(),
            })
            .await
    }
}

impl std::fmt::Debug for RequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStore")
            .field("requests", &self.requests.len())
            .finish()
    }
}
