use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded human decision, captured after a state transition commits.
///
/// Exemplars feed future reviewer-model training, so they carry the decision
/// and its audit fields but never the artifact content itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionExemplar {
    pub channel_id: String,
    pub message_ts: String,
    /// Terminal status the state moved to ("approved" or "rejected").
    pub status: String,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
