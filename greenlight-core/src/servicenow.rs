use anyhow::{Context, Result, anyhow};
use tracing::{debug, error};

const CASE_TABLE: &str = "sn_customerservice_case";

/// Connection settings for a ServiceNow instance.
#[derive(Debug, Clone)]
pub struct ServiceNowConfig {
    instance_url: String,
    username: String,
    password: String,
}

impl ServiceNowConfig {
    pub fn new(instance_url: String, username: String, password: String) -> Self {
        Self {
            instance_url: instance_url.trim_end_matches('/').to_string(),
            username,
            password,
        }
    }
}

/// Client for the ServiceNow Table API.
///
/// ServiceNow is an optional integration: when no credentials are configured
/// the client still constructs, and callers are expected to check
/// [`is_configured`](Self::is_configured) before routing work notes here.
#[derive(Clone)]
pub struct ServiceNowClient {
    client: reqwest::Client,
    config: Option<ServiceNowConfig>,
}

impl ServiceNowClient {
    pub fn new(config: Option<ServiceNowConfig>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("greenlight-supervisor")
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Appends an internal work note to a customer service case.
    ///
    /// `sys_id` is the case record's sys_id, not its human-readable case
    /// number. Work notes are internal-only and never visible to the
    /// customer on the case.
    pub async fn add_work_note(&self, sys_id: &str, note: &str) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("ServiceNow client is not configured"))?;

        let url = format!(
            "{}/api/now/table/{}/{}",
            config.instance_url, CASE_TABLE, sys_id
        );

        debug!("Adding work note to ServiceNow case {}", sys_id);

        let response = self
            .client
            .patch(&url)
            .basic_auth(&config.username, Some(&config.password))
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "work_notes": note }))
            .send()
            .await
            .context("Failed to send work note request to ServiceNow")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read ServiceNow error response")?;
            error!("ServiceNow work note failed: {} - {}", status, error_text);
            return Err(anyhow!(
                "ServiceNow work note failed: {} - {}",
                status,
                error_text
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse ServiceNow response")?;

        // The Table API wraps the updated record in a "result" envelope.
        if body.get("result").is_none() {
            return Err(anyhow!("ServiceNow response missing 'result' envelope"));
        }

        Ok(())
    }
}
