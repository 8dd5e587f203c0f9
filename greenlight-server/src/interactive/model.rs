use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use greenlight_core::review::LlmReview;

/// How long a state stays actionable when the producer does not say.
pub const DEFAULT_EXPIRY_HOURS: i64 = 24;

/// Unique identifier for an interactive state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(String);

impl StateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Use case a state belongs to. The store is shared by several interactive
/// flows; this service only acts on `supervisor_review` states, but rows of
/// other types must round-trip untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    SupervisorReview,
    #[serde(untagged)]
    Other(String),
}

impl StateType {
    pub fn as_str(&self) -> &str {
        match self {
            StateType::SupervisorReview => "supervisor_review",
            StateType::Other(name) => name,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "supervisor_review" => StateType::SupervisorReview,
            other => StateType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an interactive state.
///
/// `pending` is the only non-terminal status. `completed` is written by
/// peer flows that share the store; supervisor reviews only ever move to
/// `approved` or `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Pending => "pending",
            StateStatus::Approved => "approved",
            StateStatus::Rejected => "rejected",
            StateStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(StateStatus::Pending),
            "approved" => Some(StateStatus::Approved),
            "rejected" => Some(StateStatus::Rejected),
            "completed" => Some(StateStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of artifact a supervisor review gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    SlackMessage,
    ServicenowWorkNote,
    #[serde(untagged)]
    Other(String),
}

impl ArtifactType {
    pub fn as_str(&self) -> &str {
        match self {
            ArtifactType::SlackMessage => "slack_message",
            ArtifactType::ServicenowWorkNote => "servicenow_work_note",
            ArtifactType::Other(name) => name,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "slack_message" => ArtifactType::SlackMessage,
            "servicenow_work_note" => ArtifactType::ServicenowWorkNote,
            other => ArtifactType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a `supervisor_review` state: the drafted artifact awaiting a
/// human verdict, plus the context needed to deliver it on approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorReviewPayload {
    pub artifact_type: ArtifactType,
    /// ServiceNow case number, required for work note artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    /// Slack channel to deliver into, required for message artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Slack thread to reply in, required for message artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// The drafted text, delivered verbatim on approval.
    pub content: String,
    /// Why the workflow blocked this artifact for review.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub blocked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_review: Option<LlmReview>,
}

impl SupervisorReviewPayload {
    /// ServiceNow record sys_id, carried in metadata by the drafting
    /// workflow. The Table API is keyed on this, not the case number.
    pub fn metadata_sys_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("sysId")?.as_str()
    }
}

/// Payload column contents. Supervisor review payloads get a typed shape;
/// payloads written by peer flows are preserved as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatePayload {
    SupervisorReview(SupervisorReviewPayload),
    Opaque(serde_json::Value),
}

impl StatePayload {
    pub fn as_supervisor_review(&self) -> Option<&SupervisorReviewPayload> {
        match self {
            StatePayload::SupervisorReview(payload) => Some(payload),
            StatePayload::Opaque(_) => None,
        }
    }
}

/// A durable interactive state: one artifact (or peer-flow action) waiting
/// on, or resolved by, a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveState {
    pub id: StateId,
    #[serde(rename = "type")]
    pub state_type: StateType,
    /// Slack channel of the originating conversation.
    pub channel_id: String,
    /// Timestamp of the originating message. Together with `channel_id`
    /// this uniquely identifies the conversation anchor.
    pub message_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub payload: StatePayload,
    pub status: StateStatus,
    /// Bumped on every write to the row. Guards payload merges against
    /// concurrent writers.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl InteractiveState {
    /// Whether the state is still actionable at `now`. Expired rows are
    /// treated as absent even before the cleanup sweep removes them.
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.status == StateStatus::Pending && self.expires_at > now
    }
}

/// Fields a producer supplies when creating a state. Identity, status,
/// version and timestamps are assigned by the manager.
#[derive(Debug, Clone)]
pub struct NewInteractiveState {
    pub state_type: StateType,
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub payload: StatePayload,
    pub metadata: Option<serde_json::Value>,
    /// Overrides the manager's default expiry window.
    pub expires_in_hours: Option<i64>,
}
