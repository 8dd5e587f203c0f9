//! Queue-delivered approval worker.
//!
//! The message queue POSTs approval jobs to `/worker/approvals`. Every
//! request must carry an `upstash-signature` header: one or more
//! space-separated `v1,<base64>` values, each an HMAC-SHA256 of the raw
//! body. Verification accepts the current signing key and, during
//! rotation, the next one.
//!
//! Response codes drive the queue's redelivery: 200 is terminal (including
//! `success: false` for jobs that can never succeed), 400 is terminal bad
//! input, and 500 asks for a retry.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::AppState;
use crate::interactive::model::{InteractiveState, StateId};
use crate::supervisor::{ApprovalError, ExecutionError};

pub const MAX_WORKER_BODY_SIZE: usize = 1024 * 1024;

const SIGNATURE_HEADER: &str = "upstash-signature";

type HmacSha256 = Hmac<Sha256>;

pub fn worker_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/worker/approvals", post(process_approval_job))
        .route_layer(middleware::from_fn_with_state(
            state,
            verify_queue_signature,
        ))
}

async fn verify_queue_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_WORKER_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!("Worker request body exceeded {} bytes", MAX_WORKER_BODY_SIZE);
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let Some(signature) = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("Worker request missing {} header", SIGNATURE_HEADER);
        return Err(StatusCode::UNAUTHORIZED);
    };

    let mut keys: Vec<&str> = vec![state.current_signing_key.as_str()];
    if let Some(next_key) = &state.next_signing_key {
        keys.push(next_key.as_str());
    }

    if !signature_matches(&keys, &bytes, signature) {
        warn!("Worker request failed signature verification");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

/// Checks each signature candidate in the header against each accepted
/// key. Comparison runs through `verify_slice`, which is constant-time.
fn signature_matches(keys: &[&str], body: &[u8], signature_header: &str) -> bool {
    for part in signature_header.split(' ') {
        let Some(encoded) = part.strip_prefix("v1,") else {
            continue;
        };
        let Ok(candidate) = BASE64_STANDARD.decode(encoded) else {
            continue;
        };
        for key in keys {
            let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
                continue;
            };
            mac.update(body);
            if mac.verify_slice(&candidate).is_ok() {
                return true;
            }
        }
    }
    false
}

struct QueuedJob {
    workflow_id: String,
    reviewer: String,
}

/// Queue providers differ on whether the published JSON arrives at the top
/// level or wrapped in a `body` envelope; accept both. Older producers
/// published `stateId` instead of `workflowId`.
fn extract_job(value: &serde_json::Value) -> Option<QueuedJob> {
    let job = match value.get("body") {
        Some(body) if body.is_object() => body,
        _ => value,
    };

    let workflow_id = job
        .get("workflowId")
        .or_else(|| job.get("stateId"))
        .and_then(|v| v.as_str())?;
    let reviewer = job.get("reviewer").and_then(|v| v.as_str())?;
    if workflow_id.trim().is_empty() || reviewer.trim().is_empty() {
        return None;
    }

    Some(QueuedJob {
        workflow_id: workflow_id.to_string(),
        reviewer: reviewer.to_string(),
    })
}

async fn process_approval_job(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let started = Instant::now();

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Worker received an unparseable job payload: {}", e);
            return job_failure(StatusCode::BAD_REQUEST, "invalid JSON body", None);
        }
    };
    let Some(job) = extract_job(&value) else {
        warn!("Worker job payload missing workflowId or reviewer");
        return job_failure(StatusCode::BAD_REQUEST, "missing workflowId or reviewer", None);
    };

    info!(
        "Processing queued approval for workflow {} from {}",
        job.workflow_id, job.reviewer
    );

    let state_id = StateId::from(job.workflow_id.as_str());
    match state.actions.approve(&state_id, &job.reviewer).await {
        Ok(approved) => {
            notify_reviewer(&state, &approved, &job.reviewer).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(
                "Queued approval for workflow {} completed in {}ms",
                job.workflow_id, duration_ms
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "workflowId": job.workflow_id,
                    "durationMs": duration_ms,
                })),
            )
                .into_response()
        }
        // Terminal: the state is gone or already decided. A 200 stops the
        // queue from redelivering a job that can never succeed.
        Err(err @ ApprovalError::StateNotFound(_)) => {
            info!(
                "Queued approval for workflow {} is terminal: {}",
                job.workflow_id, err
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": false,
                    "workflowId": job.workflow_id,
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
        // A payload that fails validation fails on every redelivery too.
        Err(err @ ApprovalError::Execution(ExecutionError::Validation { .. })) => {
            warn!(
                "Queued approval for workflow {} has an unexecutable payload: {}",
                job.workflow_id, err
            );
            job_failure(StatusCode::BAD_REQUEST, &err.to_string(), None)
        }
        // Delivery or storage hiccup: ask the queue to redeliver.
        Err(err) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            error!(
                "Queued approval for workflow {} failed after {}ms: {}",
                job.workflow_id, duration_ms, err
            );
            job_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                &err.to_string(),
                Some(duration_ms),
            )
        }
    }
}

fn job_failure(status: StatusCode, error: &str, duration_ms: Option<u64>) -> Response {
    let mut body = serde_json::json!({ "success": false, "error": error });
    if let Some(duration_ms) = duration_ms {
        body["durationMs"] = duration_ms.into();
    }
    (status, Json(body)).into_response()
}

/// Best effort only: the approval is already committed, so a failed
/// notification costs the reviewer a confirmation message and nothing
/// else.
async fn notify_reviewer(state: &AppState, approved: &InteractiveState, reviewer: &str) {
    let thread_ts = approved.thread_ts.as_deref().unwrap_or(&approved.message_ts);
    let text = format!("Approved by {reviewer}. The drafted artifact has been delivered.");
    if let Err(e) = state
        .slack
        .post_thread_reply(&approved.channel_id, thread_ts, &text)
        .await
    {
        warn!(
            "Failed to notify {} about approved state {}: {}",
            approved.channel_id, approved.id, e
        );
    }
}
