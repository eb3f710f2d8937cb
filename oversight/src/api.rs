//! Workflow API over newline-delimited JSON.
//!
//! Each input line is one [`ApiRequest`]; each output line is the matching
//! [`ApiResponse`]. Rejected operations come back with `ok: false` and a
//! stable error code so callers can tell them apart from successes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use approvals::{ApprovalError, GovernanceService, RequestFilter, SignatureSubmission};
use constitution::{ActionProposal, RequirementSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Evaluate only, never opens a request
    Evaluate { action: ActionProposal },
    /// Evaluate and open a request when needed
    Propose {
        action: ActionProposal,
        #[serde(default)]
        risk_score: u8,
    },
    Get { request_id: String },
    List {
        #[serde(default)]
        filter: RequestFilter,
    },
    /// Open requests the approver could sign
    Signable {
        approver_id: String,
        approver_role: String,
    },
    Sign {
        request_id: String,
        signature: SignatureSubmission,
    },
    Escalate {
        request_id: String,
        requirement: RequirementSpec,
        actor_id: String,
        actor_role: String,
    },
    Cancel {
        request_id: String,
        actor_id: String,
        actor_role: String,
        #[serde(default)]
        mfa_verified: bool,
        reason: String,
    },
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                code: None,
                error: None,
            },
            Err(e) => Self::failure("serialization", e.to_string()),
        }
    }

    fn failure(code: &str, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            code: Some(code.to_string()),
            error: Some(error.into()),
        }
    }
}

impl From<ApprovalError> for ApiResponse {
    fn from(e: ApprovalError) -> Self {
        Self::failure(e.code(), e.to_string())
    }
}

fn respond<T: Serialize>(result: Result<T, ApprovalError>) -> ApiResponse {
    match result {
        Ok(value) => ApiResponse::success(value),
        Err(e) => e.into(),
    }
}

/// Execute one API request.
pub async fn handle(service: &GovernanceService, request: ApiRequest) -> ApiResponse {
    match request {
        ApiRequest::Evaluate { action } => ApiResponse::success(service.evaluate(&action)),
        ApiRequest::Propose { action, risk_score } => {
            respond(service.propose(&action, risk_score).await)
        }
        ApiRequest::Get { request_id } => respond(service.get(&request_id).await),
        ApiRequest::List { filter } => ApiResponse::success(service.list(&filter).await),
        ApiRequest::Signable {
            approver_id,
            approver_role,
        } => ApiResponse::success(service.signable_by(&approver_id, &approver_role).await),
        ApiRequest::Sign {
            request_id,
            signature,
        } => respond(service.sign(&request_id, signature).await),
        ApiRequest::Escalate {
            request_id,
            requirement,
            actor_id,
            actor_role,
        } => respond(
            service
                .escalate(&request_id, &requirement, &actor_id, &actor_role)
                .await,
        ),
        ApiRequest::Cancel {
            request_id,
            actor_id,
            actor_role,
            mfa_verified,
            reason,
        } => respond(
            service
                .cancel(&request_id, &actor_id, &actor_role, mfa_verified, &reason)
                .await,
        ),
        ApiRequest::Sweep => ApiResponse::success(service.sweep().await),
    }
}

/// Serve requests line by line until the reader hits EOF.
pub async fn serve_lines<R, W>(service: &GovernanceService, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ApiRequest>(&line) {
            Ok(request) => {
                debug!(request = ?request, "API request");
                handle(service, request).await
            }
            Err(e) => {
                warn!(error = %e, "Malformed API request");
                ApiResponse::failure("bad_request", e.to_string())
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(())
}
