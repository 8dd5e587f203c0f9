//! Ingress for approval requests from the drafting workflow.
//!
//! Requests are not executed here. They are debounced per reviewer by the
//! [`RequestBatcher`](crate::batcher::RequestBatcher) and flushed to the
//! queue, which calls back into `/worker/approvals` with a signed job.

use anyhow::bail;
use async_trait::async_trait;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use greenlight_core::{ApprovalJob, QueuePublisher};

use crate::AppState;
use crate::batcher::{BatchProcessor, BatchedRequest};
use crate::status::validate_bearer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueApprovalRequest {
    pub workflow_id: String,
    pub reviewer: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueApprovalResponse {
    pub accepted: bool,
    /// Requests currently held in unflushed batches, including this one.
    pub pending: usize,
}

pub async fn enqueue_approval(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Auth comes first: the body is not even parsed for callers that fail
    // the bearer check.
    if let Err(response) = validate_bearer(&headers, &state.status_auth_token) {
        return response;
    }

    let request: EnqueueApprovalRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting unparseable approval request: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid JSON body").into_response();
        }
    };

    if request.workflow_id.trim().is_empty() || request.reviewer.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "workflowId and reviewer are required",
        )
            .into_response();
    }

    state
        .batcher
        .add_request(
            &request.workflow_id,
            &request.reviewer,
            state.publish_processor.clone(),
        )
        .await;
    let pending = state.batcher.pending_count().await;
    info!(
        "Accepted approval request for workflow {} (reviewer {}, {} pending in batches)",
        request.workflow_id, request.reviewer, pending
    );

    (
        StatusCode::ACCEPTED,
        Json(EnqueueApprovalResponse {
            accepted: true,
            pending,
        }),
    )
        .into_response()
}

/// Flush target for the batcher: one queue message per batched request.
///
/// Failures are isolated per request so one rejected publish does not
/// poison the rest of the batch, but any failure is still reported to the
/// batcher so the drop gets logged there.
pub struct QueueBatchProcessor {
    publisher: QueuePublisher,
}

impl QueueBatchProcessor {
    pub fn new(publisher: QueuePublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl BatchProcessor for QueueBatchProcessor {
    async fn process(&self, requests: Vec<BatchedRequest>) -> anyhow::Result<()> {
        let total = requests.len();
        let mut failed = 0usize;

        for request in requests {
            let job = ApprovalJob {
                workflow_id: request.workflow_id,
                reviewer: request.reviewer,
            };
            if let Err(e) = self.publisher.publish(&job).await {
                error!(
                    "Failed to publish approval job for workflow {}: {:#}",
                    job.workflow_id, e
                );
                failed += 1;
            }
        }

        if failed > 0 {
            bail!("{failed} of {total} approval publish(es) failed");
        }
        Ok(())
    }
}
