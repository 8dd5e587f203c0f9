use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

pub const DEFAULT_QUEUE_URL: &str = "https://qstash.upstash.io";

/// Settings for the upstash-style message queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bearer token for the publish API.
    pub token: String,
    /// Base URL of the queue provider.
    pub queue_url: String,
    /// Full URL of the worker endpoint messages are delivered to.
    pub worker_url: String,
}

/// One approval job as delivered to the async worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalJob {
    pub workflow_id: String,
    pub reviewer: String,
}

/// Publishes approval jobs to the message queue for async delivery.
///
/// When the queue is not configured, publishes degrade to a logged no-op so
/// that development environments without queue credentials keep working.
#[derive(Clone)]
pub struct QueuePublisher {
    client: reqwest::Client,
    config: Option<QueueConfig>,
}

impl QueuePublisher {
    pub fn new(config: Option<QueueConfig>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("greenlight-supervisor")
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Publishes one approval job to the worker endpoint via the queue.
    pub async fn publish(&self, job: &ApprovalJob) -> Result<()> {
        let Some(config) = &self.config else {
            warn!(
                "Queue publisher not configured; dropping approval job for workflow {}",
                job.workflow_id
            );
            return Ok(());
        };

        let url = format!(
            "{}/v2/publish/{}",
            config.queue_url.trim_end_matches('/'),
            config.worker_url
        );

        debug!(
            "Publishing approval job for workflow {} to {}",
            job.workflow_id, config.worker_url
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&config.token)
            .json(job)
            .send()
            .await
            .context("Failed to send publish request to queue")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read queue error response")?;
            error!("Queue publish failed: {} - {}", status, error_text);
            return Err(anyhow!(
                "Queue publish failed: {} - {}",
                status,
                error_text
            ));
        }

        Ok(())
    }
}
