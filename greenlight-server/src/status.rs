//! Operator visibility into the pending supervisor queue.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use greenlight_core::review::ReviewVerdict;

use crate::AppState;
use crate::interactive::model::{ArtifactType, InteractiveState, StateType};

/// Rejects the request unless it carries `Authorization: Bearer <token>`
/// matching the configured service token. With no token configured the
/// authenticated endpoints are disabled, not open.
pub fn validate_bearer(headers: &HeaderMap, expected: &Option<String>) -> Result<(), Response> {
    let Some(expected) = expected else {
        warn!("Authenticated endpoint hit but no service auth token is configured");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "service auth token is not configured",
        )
            .into_response());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response()),
    }
}

/// Filters over the pending listing, parsed from `key:value` tokens.
/// Unknown keys and unparseable values are ignored rather than rejected,
/// so an operator typo degrades to a broader listing.
#[derive(Debug, Default, PartialEq)]
pub struct ListFilters {
    pub artifact_type: Option<ArtifactType>,
    pub verdict: Option<ReviewVerdict>,
    pub min_age_minutes: Option<i64>,
    pub limit: Option<usize>,
}

impl ListFilters {
    pub fn parse(input: &str) -> Self {
        let mut filters = ListFilters::default();
        for token in input.split_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.to_lowercase().as_str() {
                "type" => filters.artifact_type = Some(ArtifactType::parse(&value.to_lowercase())),
                "verdict" => filters.verdict = parse_verdict(value),
                "age" => filters.min_age_minutes = value.parse().ok().filter(|m| *m >= 0),
                "limit" => filters.limit = value.parse().ok().filter(|n| *n > 0),
                _ => {}
            }
        }
        filters
    }

    fn matches(&self, state: &InteractiveState, now: DateTime<Utc>) -> bool {
        let Some(payload) = state.payload.as_supervisor_review() else {
            return false;
        };
        if let Some(wanted) = &self.artifact_type {
            if &payload.artifact_type != wanted {
                return false;
            }
        }
        if let Some(wanted) = self.verdict {
            match &payload.llm_review {
                Some(review) if review.verdict == wanted => {}
                _ => return false,
            }
        }
        if let Some(min_age) = self.min_age_minutes {
            if (now - state.created_at).num_minutes() < min_age {
                return false;
            }
        }
        true
    }
}

fn parse_verdict(value: &str) -> Option<ReviewVerdict> {
    match value.to_lowercase().as_str() {
        "pass" => Some(ReviewVerdict::Pass),
        "revise" => Some(ReviewVerdict::Revise),
        "critical" => Some(ReviewVerdict::Critical),
        _ => None,
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total_pending: usize,
    pub slack_messages: usize,
    pub work_notes: usize,
    pub other_artifacts: usize,
    pub verdict_pass: usize,
    pub verdict_revise: usize,
    pub verdict_critical: usize,
    pub unreviewed: usize,
}

impl StatusSummary {
    fn count(states: &[InteractiveState]) -> Self {
        let mut summary = StatusSummary::default();
        for state in states {
            let Some(payload) = state.payload.as_supervisor_review() else {
                continue;
            };
            summary.total_pending += 1;
            match &payload.artifact_type {
                ArtifactType::SlackMessage => summary.slack_messages += 1,
                ArtifactType::ServicenowWorkNote => summary.work_notes += 1,
                ArtifactType::Other(_) => summary.other_artifacts += 1,
            }
            match payload.llm_review.as_ref().map(|review| review.verdict) {
                Some(ReviewVerdict::Pass) => summary.verdict_pass += 1,
                Some(ReviewVerdict::Revise) => summary.verdict_revise += 1,
                Some(ReviewVerdict::Critical) => summary.verdict_critical += 1,
                None => summary.unreviewed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub id: String,
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    pub reason: String,
    pub age_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingEntry {
    fn from_state(state: &InteractiveState, now: DateTime<Utc>) -> Option<Self> {
        let payload = state.payload.as_supervisor_review()?;
        Some(Self {
            id: state.id.to_string(),
            artifact_type: payload.artifact_type.to_string(),
            case_number: payload.case_number.clone(),
            channel_id: state.channel_id.clone(),
            verdict: payload
                .llm_review
                .as_ref()
                .map(|review| review.verdict.to_string()),
            reason: payload.reason.clone(),
            age_minutes: (now - state.created_at).num_minutes(),
            created_at: state.created_at,
            expires_at: state.expires_at,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub service_version: String,
    pub summary: StatusSummary,
    /// Requests waiting in unflushed approval batches.
    pub batched_requests: usize,
    pub pending: Vec<PendingEntry>,
}

impl StatusData {
    /// The summary always covers the whole pending queue; filters narrow
    /// only the listing.
    pub fn build(
        states: &[InteractiveState],
        filters: &ListFilters,
        batched_requests: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let summary = StatusSummary::count(states);
        let mut pending: Vec<PendingEntry> = states
            .iter()
            .filter(|state| filters.matches(state, now))
            .filter_map(|state| PendingEntry::from_state(state, now))
            .collect();
        if let Some(limit) = filters.limit {
            pending.truncate(limit);
        }

        Self {
            service_version: crate::get_service_version(),
            summary,
            batched_requests,
            pending,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub filter: Option<String>,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Response {
    if let Err(response) = validate_bearer(&headers, &state.status_auth_token) {
        return response;
    }

    let filters = query
        .filter
        .as_deref()
        .map(ListFilters::parse)
        .unwrap_or_default();
    let now = Utc::now();
    let states = state
        .manager
        .get_pending_states_by_type(&StateType::SupervisorReview)
        .await;
    let batched_requests = state.batcher.pending_count().await;

    Json(StatusData::build(&states, &filters, batched_requests, now)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::model::{
        StateId, StatePayload, StateStatus, SupervisorReviewPayload,
    };
    use chrono::Duration;
    use greenlight_core::review::LlmReview;

    fn state_with(
        artifact_type: ArtifactType,
        verdict: Option<ReviewVerdict>,
        age_minutes: i64,
        now: DateTime<Utc>,
    ) -> InteractiveState {
        InteractiveState {
            id: StateId::generate(),
            state_type: StateType::SupervisorReview,
            channel_id: "C1".to_string(),
            message_ts: format!("{}.000", age_minutes),
            thread_ts: None,
            payload: StatePayload::SupervisorReview(SupervisorReviewPayload {
                artifact_type,
                case_number: Some("CS0012345".to_string()),
                channel_id: Some("C1".to_string()),
                thread_ts: None,
                content: "Draft".to_string(),
                reason: "flagged".to_string(),
                metadata: None,
                blocked_at: now - Duration::minutes(age_minutes),
                llm_review: verdict.map(|verdict| LlmReview {
                    verdict,
                    confidence: 0.9,
                    summary: "summary".to_string(),
                    issues: vec![],
                }),
            }),
            status: StateStatus::Pending,
            version: 1,
            created_at: now - Duration::minutes(age_minutes),
            expires_at: now + Duration::hours(24),
            processed_by: None,
            processed_at: None,
            error_message: None,
            metadata: None,
        }
    }

    #[test]
    fn test_parse_reads_known_filter_tokens() {
        let filters = ListFilters::parse("type:slack_message verdict:critical age:30 limit:5");
        assert_eq!(filters.artifact_type, Some(ArtifactType::SlackMessage));
        assert_eq!(filters.verdict, Some(ReviewVerdict::Critical));
        assert_eq!(filters.min_age_minutes, Some(30));
        assert_eq!(filters.limit, Some(5));
    }

    #[test]
    fn test_parse_ignores_unknown_keys_and_garbage_values() {
        let filters = ListFilters::parse("owner:alice age:soon limit:0 noise verdict: type:");
        assert_eq!(filters, ListFilters::default());
    }

    #[test]
    fn test_parse_is_case_insensitive_on_keys() {
        let filters = ListFilters::parse("TYPE:servicenow_work_note Verdict:PASS");
        assert_eq!(filters.artifact_type, Some(ArtifactType::ServicenowWorkNote));
        assert_eq!(filters.verdict, Some(ReviewVerdict::Pass));
    }

    #[test]
    fn test_parse_empty_input_is_unfiltered() {
        assert_eq!(ListFilters::parse(""), ListFilters::default());
        assert_eq!(ListFilters::parse("   "), ListFilters::default());
    }

    #[test]
    fn test_filters_narrow_listing_but_not_summary() {
        let now = Utc::now();
        let states = vec![
            state_with(ArtifactType::SlackMessage, Some(ReviewVerdict::Critical), 60, now),
            state_with(ArtifactType::SlackMessage, Some(ReviewVerdict::Pass), 10, now),
            state_with(ArtifactType::ServicenowWorkNote, None, 120, now),
        ];

        let filters = ListFilters::parse("type:slack_message age:30");
        let data = StatusData::build(&states, &filters, 2, now);

        assert_eq!(data.summary.total_pending, 3);
        assert_eq!(data.summary.slack_messages, 2);
        assert_eq!(data.summary.work_notes, 1);
        assert_eq!(data.summary.verdict_critical, 1);
        assert_eq!(data.summary.unreviewed, 1);
        assert_eq!(data.batched_requests, 2);

        assert_eq!(data.pending.len(), 1);
        assert_eq!(data.pending[0].artifact_type, "slack_message");
        assert_eq!(data.pending[0].verdict.as_deref(), Some("critical"));
        assert_eq!(data.pending[0].age_minutes, 60);
    }

    #[test]
    fn test_verdict_filter_excludes_unreviewed_states() {
        let now = Utc::now();
        let states = vec![
            state_with(ArtifactType::SlackMessage, None, 5, now),
            state_with(ArtifactType::SlackMessage, Some(ReviewVerdict::Revise), 5, now),
        ];

        let filters = ListFilters::parse("verdict:revise");
        let data = StatusData::build(&states, &filters, 0, now);
        assert_eq!(data.pending.len(), 1);
        assert_eq!(data.pending[0].verdict.as_deref(), Some("revise"));
    }

    #[test]
    fn test_limit_truncates_after_filtering() {
        let now = Utc::now();
        let states: Vec<InteractiveState> = (0..6)
            .map(|i| state_with(ArtifactType::SlackMessage, None, i, now))
            .collect();

        let filters = ListFilters::parse("limit:2");
        let data = StatusData::build(&states, &filters, 0, now);
        assert_eq!(data.pending.len(), 2);
        assert_eq!(data.summary.total_pending, 6);
    }

    #[test]
    fn test_validate_bearer_paths() {
        let token = Some("service-token".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer service-token".parse().unwrap());
        assert!(validate_bearer(&headers, &token).is_ok());

        let mut wrong = HeaderMap::new();
        wrong.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        let response = validate_bearer(&wrong, &token).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = validate_bearer(&HeaderMap::new(), &token).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Not configured: disabled, not open.
        let response = validate_bearer(&headers, &None).unwrap_err();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
