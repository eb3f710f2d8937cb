//! Expiration sweeper.
//!
//! Background loop that expires open requests past their deadline and
//! auto-escalates stalled requests in high-risk categories. Every state
//! change is re-checked under the request's lock, so a signature that wins
//! the race is never overwritten and one that loses sees `RequestClosed`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::escalation::EscalationManager;
use crate::events::ApprovalEventKind;
use crate::store::{RequestFilter, RequestStore};
use crate::types::{ApprovalError, ApprovalRequest, ApprovalStatus, EscalationTrigger, Result};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub escalated: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.escalated.is_empty()
    }
}

/// Terminates stale requests on a fixed tick.
pub struct ExpirationSweeper {
    store: Arc<RequestStore>,
    escalation: Arc<EscalationManager>,
    config: SweeperConfig,
}

impl ExpirationSweeper {
    pub fn new(
        store: Arc<RequestStore>,
        escalation: Arc<EscalationManager>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            escalation,
            config,
        }
    }

    /// Run one pass over every open request.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.store.clock().now();
        let mut report = SweepReport::default();

        for request in self.store.list(&RequestFilter::open()).await {
            if now >= request.expires_at {
                match self.expire(&request.request_id, now).await {
                    Ok(_) => report.expired.push(request.request_id),
                    Err(e) => debug!(request_id = %request.request_id, error = %e, "Expiry skipped"),
                }
            } else if self.should_auto_escalate(&request, now) {
                match self.auto_escalate(&request.request_id, now).await {
                    Ok(_) => report.escalated.push(request.request_id),
                    Err(e) => debug!(request_id = %request.request_id, error = %e, "Auto-escalation skipped"),
                }
            }
        }

        if !report.is_empty() {
            info!(
                expired = report.expired.len(),
                escalated = report.escalated.len(),
                "Sweep complete"
            );
        }
        report
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = StdDuration::from_secs(self.config.tick_secs.max(1));
        let mut tick = interval(period);
        info!(tick_secs = period.as_secs(), "Expiration sweeper started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiration sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn expire(&self, request_id: &str, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let request = self
            .store
            .update(request_id, |request| {
                request.ensure_open()?;
                if now < request.expires_at {
                    // Escalated in the meantime
                    return Err(ApprovalError::InvalidTransition {
                        from: request.status,
                        to: ApprovalStatus::Expired,
                    });
                }
                request.transition(ApprovalStatus::Expired, now)?;
                Ok(ApprovalEventKind::Expired)
            })
            .await?;

        warn!(
            request_id = %request.request_id,
            action_id = %request.action_id,
            expires_at = %request.expires_at,
            "Approval request expired"
        );
        Ok(request)
    }

    fn should_auto_escalate(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> bool {
        request.status == ApprovalStatus::Pending
            && request.signatures.is_empty()
            && self
                .config
                .auto_escalate_categories
                .contains(&request.action_category)
            && now + self.lead() >= request.expires_at
    }

    async fn auto_escalate(&self, request_id: &str, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let requirement = self.escalation_requirement()?;
        let lead = self.lead();
        let trigger = EscalationTrigger::Automatic {
            reason: format!(
                "no signatures within {} minutes of deadline",
                self.config.escalation_lead_minutes
            ),
        };

        self.escalation
            .escalate_when(request_id, requirement, trigger, |request| {
                let stalled = request.status == ApprovalStatus::Pending
                    && request.signatures.is_empty()
                    && now + lead >= request.expires_at;
                if stalled {
                    Ok(())
                } else {
                    Err(ApprovalError::InvalidTransition {
                        from: request.status,
                        to: ApprovalStatus::Escalated,
                    })
                }
            })
            .await
    }

    fn escalation_requirement(&self) -> Result<constitution::ApprovalRequirement> {
        Ok(self
            .escalation
            .catalog()
            .resolve(&self.config.escalation_requirement)?)
    }

    fn lead(&self) -> Duration {
        Duration::minutes(i64::from(self.config.escalation_lead_minutes))
    }
}
