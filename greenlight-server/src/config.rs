//! Environment-driven configuration.

use anyhow::{Context, Result, bail, ensure};
use std::env;
use std::path::PathBuf;

use greenlight_core::queue::{DEFAULT_QUEUE_URL, QueueConfig};
use greenlight_core::servicenow::ServiceNowConfig;

use crate::interactive::model::DEFAULT_EXPIRY_HOURS;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding the state database.
    pub state_dir: PathBuf,
    /// Dev escape hatch: hold interactive states in memory only.
    pub state_db_in_memory: bool,
    pub slack_bot_token: String,
    pub current_signing_key: String,
    pub next_signing_key: Option<String>,
    pub queue_token: Option<String>,
    pub queue_url: String,
    /// Public base URL of this service, used as the queue callback target.
    pub worker_base_url: Option<String>,
    pub servicenow: Option<ServiceNowConfig>,
    /// Bearer token for /status and /approvals. Unset disables both.
    pub status_auth_token: Option<String>,
    pub exemplar_log_path: Option<PathBuf>,
    pub state_expiry_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match optional_env("PORT") {
            Some(value) => value
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            None => 3000,
        };

        let state_dir = PathBuf::from(optional_env("STATE_DIR").unwrap_or_else(|| ".".to_string()));
        let state_db_in_memory = flag_enabled(optional_env("STATE_DB_IN_MEMORY"));

        let slack_bot_token = env::var("SLACK_BOT_TOKEN")
            .context("SLACK_BOT_TOKEN environment variable is required")?;
        let current_signing_key = env::var("QSTASH_CURRENT_SIGNING_KEY")
            .context("QSTASH_CURRENT_SIGNING_KEY environment variable is required")?;
        let next_signing_key = optional_env("QSTASH_NEXT_SIGNING_KEY");

        let queue_token = optional_env("QSTASH_TOKEN");
        let queue_url = optional_env("QSTASH_URL").unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string());
        let worker_base_url = optional_env("WORKER_BASE_URL");

        let servicenow = servicenow_from_parts(
            optional_env("SERVICENOW_URL"),
            optional_env("SERVICENOW_USERNAME"),
            optional_env("SERVICENOW_PASSWORD"),
        )?;

        let status_auth_token = optional_env("STATUS_AUTH_TOKEN");
        let exemplar_log_path = optional_env("EXEMPLAR_LOG_PATH").map(PathBuf::from);
        let state_expiry_hours = parse_expiry_hours(optional_env("STATE_EXPIRY_HOURS"))?;

        Ok(Self {
            port,
            state_dir,
            state_db_in_memory,
            slack_bot_token,
            current_signing_key,
            next_signing_key,
            queue_token,
            queue_url,
            worker_base_url,
            servicenow,
            status_auth_token,
            exemplar_log_path,
            state_expiry_hours,
        })
    }

    /// Queue publishing needs both credentials and a callback destination.
    /// With either missing the publisher degrades to a logged no-op.
    pub fn queue_config(&self) -> Option<QueueConfig> {
        match (&self.queue_token, &self.worker_base_url) {
            (Some(token), Some(base_url)) => Some(QueueConfig {
                token: token.clone(),
                queue_url: self.queue_url.clone(),
                worker_url: format!("{}/worker/approvals", base_url.trim_end_matches('/')),
            }),
            _ => None,
        }
    }
}

/// Missing and blank are treated the same for optional settings.
fn optional_env(name: &str) -> Option<String> {
    non_blank(env::var(name).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn flag_enabled(value: Option<String>) -> bool {
    matches!(
        non_blank(value).map(|v| v.to_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn servicenow_from_parts(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<Option<ServiceNowConfig>> {
    match (url, username, password) {
        (Some(url), Some(username), Some(password)) => {
            Ok(Some(ServiceNowConfig::new(url, username, password)))
        }
        (None, None, None) => Ok(None),
        _ => bail!(
            "SERVICENOW_URL, SERVICENOW_USERNAME and SERVICENOW_PASSWORD must be set together"
        ),
    }
}

/// One year. Anything larger is a typo, and absurd values would overflow
/// the expiry arithmetic.
const MAX_EXPIRY_HOURS: i64 = 24 * 365;

fn parse_expiry_hours(value: Option<String>) -> Result<i64> {
    match non_blank(value) {
        Some(raw) => {
            let hours = raw
                .parse::<i64>()
                .context("STATE_EXPIRY_HOURS must be an integer")?;
            ensure!(hours > 0, "STATE_EXPIRY_HOURS must be positive");
            ensure!(
                hours <= MAX_EXPIRY_HOURS,
                "STATE_EXPIRY_HOURS must be at most {MAX_EXPIRY_HOURS} (one year)"
            );
            Ok(hours)
        }
        None => Ok(DEFAULT_EXPIRY_HOURS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_queue(
        queue_token: Option<&str>,
        worker_base_url: Option<&str>,
    ) -> Config {
        Config {
            port: 3000,
            state_dir: PathBuf::from("."),
            state_db_in_memory: false,
            slack_bot_token: "xoxb-test".to_string(),
            current_signing_key: "sig_current".to_string(),
            next_signing_key: None,
            queue_token: queue_token.map(String::from),
            queue_url: "https://queue.example.com".to_string(),
            worker_base_url: worker_base_url.map(String::from),
            servicenow: None,
            status_auth_token: None,
            exemplar_log_path: None,
            state_expiry_hours: DEFAULT_EXPIRY_HOURS,
        }
    }

    #[test]
    fn test_non_blank_filters_whitespace_only_values() {
        assert_eq!(non_blank(Some("value".to_string())), Some("value".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(Some(String::new())), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_flag_enabled_accepts_common_truthy_spellings() {
        assert!(flag_enabled(Some("1".to_string())));
        assert!(flag_enabled(Some("true".to_string())));
        assert!(flag_enabled(Some("TRUE".to_string())));
        assert!(flag_enabled(Some("yes".to_string())));
        assert!(!flag_enabled(Some("0".to_string())));
        assert!(!flag_enabled(Some("no".to_string())));
        assert!(!flag_enabled(None));
    }

    #[test]
    fn test_servicenow_requires_all_three_parts() {
        let full = servicenow_from_parts(
            Some("https://dev.service-now.com".to_string()),
            Some("api_user".to_string()),
            Some("secret".to_string()),
        )
        .unwrap();
        assert!(full.is_some());

        assert!(servicenow_from_parts(None, None, None).unwrap().is_none());

        let partial = servicenow_from_parts(
            Some("https://dev.service-now.com".to_string()),
            None,
            Some("secret".to_string()),
        );
        assert!(partial.is_err());
    }

    #[test]
    fn test_parse_expiry_hours() {
        assert_eq!(parse_expiry_hours(None).unwrap(), DEFAULT_EXPIRY_HOURS);
        assert_eq!(parse_expiry_hours(Some("72".to_string())).unwrap(), 72);
        assert_eq!(
            parse_expiry_hours(Some(MAX_EXPIRY_HOURS.to_string())).unwrap(),
            MAX_EXPIRY_HOURS
        );
        assert!(parse_expiry_hours(Some("0".to_string())).is_err());
        assert!(parse_expiry_hours(Some("-4".to_string())).is_err());
        assert!(parse_expiry_hours(Some("soon".to_string())).is_err());
        // A value past one year would overflow the expiry arithmetic.
        assert!(parse_expiry_hours(Some((MAX_EXPIRY_HOURS + 1).to_string())).is_err());
        assert!(parse_expiry_hours(Some("9000000000000".to_string())).is_err());
    }

    #[test]
    fn test_queue_config_joins_worker_path() {
        let config = config_with_queue(Some("tok"), Some("https://greenlight.example.com/"));
        let queue = config.queue_config().unwrap();
        assert_eq!(
            queue.worker_url,
            "https://greenlight.example.com/worker/approvals"
        );
        assert_eq!(queue.queue_url, "https://queue.example.com");
        assert_eq!(queue.token, "tok");
    }

    #[test]
    fn test_queue_config_requires_token_and_destination() {
        assert!(config_with_queue(Some("tok"), None).queue_config().is_none());
        assert!(
            config_with_queue(None, Some("https://greenlight.example.com"))
                .queue_config()
                .is_none()
        );
        assert!(config_with_queue(None, None).queue_config().is_none());
    }
}
