//! Delivery of approved artifacts to their destination systems.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use greenlight_core::{ServiceNowClient, SlackClient};

use crate::interactive::model::{ArtifactType, SupervisorReviewPayload};

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The payload cannot be executed as stored; redelivery will not help.
    #[error("invalid {artifact} payload: {reason}")]
    Validation {
        artifact: &'static str,
        reason: &'static str,
    },
    /// The destination system failed or refused; safe to retry.
    #[error("artifact delivery failed: {0}")]
    Downstream(#[source] anyhow::Error),
}

impl ExecutionError {
    fn validation(artifact: &'static str, reason: &'static str) -> Self {
        ExecutionError::Validation { artifact, reason }
    }
}

/// Delivers one approved artifact. Implementations must be side-effect
/// free on error paths they report as [`ExecutionError::Validation`].
#[async_trait]
pub trait ArtifactExecutor: Send + Sync {
    async fn execute(&self, payload: &SupervisorReviewPayload) -> Result<(), ExecutionError>;
}

/// Production executor backed by the real Slack and ServiceNow clients.
pub struct LiveArtifactExecutor {
    slack: SlackClient,
    servicenow: ServiceNowClient,
}

impl LiveArtifactExecutor {
    pub fn new(slack: SlackClient, servicenow: ServiceNowClient) -> Self {
        Self { slack, servicenow }
    }

    async fn deliver_slack_message(
        &self,
        payload: &SupervisorReviewPayload,
    ) -> Result<(), ExecutionError> {
        let channel_id = payload
            .channel_id
            .as_deref()
            .ok_or_else(|| ExecutionError::validation("slack_message", "missing channelId"))?;
        let thread_ts = payload
            .thread_ts
            .as_deref()
            .ok_or_else(|| ExecutionError::validation("slack_message", "missing threadTs"))?;

        info!(
            "Delivering approved reply to {} in thread {}",
            channel_id, thread_ts
        );
        self.slack
            .post_thread_reply(channel_id, thread_ts, &payload.content)
            .await
            .map_err(ExecutionError::Downstream)?;
        Ok(())
    }

    async fn deliver_work_note(
        &self,
        payload: &SupervisorReviewPayload,
    ) -> Result<(), ExecutionError> {
        let case_number = payload.case_number.as_deref().ok_or_else(|| {
            ExecutionError::validation("servicenow_work_note", "missing caseNumber")
        })?;
        let sys_id = payload.metadata_sys_id().ok_or_else(|| {
            ExecutionError::validation("servicenow_work_note", "missing metadata.sysId")
        })?;
        if !self.servicenow.is_configured() {
            return Err(ExecutionError::validation(
                "servicenow_work_note",
                "ServiceNow client is not configured",
            ));
        }

        info!(
            "Delivering approved work note to case {} ({})",
            case_number, sys_id
        );
        self.servicenow
            .add_work_note(sys_id, &payload.content)
            .await
            .map_err(ExecutionError::Downstream)?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactExecutor for LiveArtifactExecutor {
    async fn execute(&self, payload: &SupervisorReviewPayload) -> Result<(), ExecutionError> {
        match &payload.artifact_type {
            ArtifactType::SlackMessage => self.deliver_slack_message(payload).await,
            ArtifactType::ServicenowWorkNote => self.deliver_work_note(payload).await,
            // An unrecognized artifact was drafted by a newer producer.
            // Approving it records the decision without a delivery.
            ArtifactType::Other(name) => {
                warn!(
                    "No executor for artifact type '{}'; approving without delivery",
                    name
                );
                Ok(())
            }
        }
    }
}
