//! Lifecycle operations over the interactive state store.
//!
//! Reads and listings degrade softly: a storage failure is logged and
//! reported as "nothing there", so a flaky disk turns into a reviewer
//! seeing an empty queue rather than a crashed workflow. The one deliberate
//! exception is [`InteractiveStateManager::mark_processed`], whose storage
//! errors must propagate so the async worker can signal a retryable
//! failure instead of silently losing a decision.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use greenlight_core::exemplar::{DecisionExemplar, ExemplarSink};

use super::model::{
    InteractiveState, NewInteractiveState, StateId, StateStatus, StateType,
};
use super::repository::{ProcessedUpdate, RepositoryError, StateRepository};

pub struct InteractiveStateManager {
    repository: Arc<dyn StateRepository>,
    exemplar_sink: Option<ExemplarSink>,
    default_expiry_hours: i64,
}

impl InteractiveStateManager {
    pub fn new(
        repository: Arc<dyn StateRepository>,
        exemplar_sink: Option<ExemplarSink>,
        default_expiry_hours: i64,
    ) -> Self {
        Self {
            repository,
            exemplar_sink,
            default_expiry_hours,
        }
    }

    /// Creates and persists a pending state, returning the stored record.
    /// Returns `None` if persistence failed; producers treat that as "the
    /// approval gate is unavailable" and surface it upstream.
    pub async fn save_state(&self, new_state: NewInteractiveState) -> Option<InteractiveState> {
        let now = Utc::now();
        let expiry_hours = new_state
            .expires_in_hours
            .unwrap_or(self.default_expiry_hours);

        let state = InteractiveState {
            id: StateId::generate(),
            state_type: new_state.state_type,
            channel_id: new_state.channel_id,
            message_ts: new_state.message_ts,
            thread_ts: new_state.thread_ts,
            payload: new_state.payload,
            status: StateStatus::Pending,
            version: 1,
            created_at: now,
            expires_at: now + Duration::hours(expiry_hours),
            processed_by: None,
            processed_at: None,
            error_message: None,
            metadata: new_state.metadata,
        };

        match self.repository.save(&state).await {
            Ok(()) => {
                debug!(
                    "Saved {} state {} for {}/{}",
                    state.state_type, state.id, state.channel_id, state.message_ts
                );
                Some(state)
            }
            Err(e) => {
                error!(
                    "Failed to save interactive state for {}/{}: {}",
                    state.channel_id, state.message_ts, e
                );
                None
            }
        }
    }

    /// Pending, unexpired state at a conversation anchor, optionally
    /// narrowed to one state type.
    pub async fn get_state(
        &self,
        channel_id: &str,
        message_ts: &str,
        state_type: Option<&StateType>,
    ) -> Option<InteractiveState> {
        match self
            .repository
            .get_pending_by_channel_message(channel_id, message_ts, state_type, Utc::now())
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!(
                    "Failed to load interactive state for {}/{}: {}",
                    channel_id, message_ts, e
                );
                None
            }
        }
    }

    /// Lookup by id with no status or expiry filter, so callers can tell
    /// "already processed" apart from "never existed".
    pub async fn get_state_by_id(&self, id: &StateId) -> Option<InteractiveState> {
        match self.repository.get_by_id(id).await {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to load interactive state {}: {}", id, e);
                None
            }
        }
    }

    /// Pending, unexpired states of one type, newest first.
    pub async fn get_pending_states_by_type(
        &self,
        state_type: &StateType,
    ) -> Vec<InteractiveState> {
        match self
            .repository
            .list_pending_by_type(state_type, Utc::now())
            .await
        {
            Ok(states) => states,
            Err(e) => {
                error!("Failed to list pending {} states: {}", state_type, e);
                Vec::new()
            }
        }
    }

    /// Commits the pending-to-terminal transition. Returns `Ok(false)`
    /// when no pending row matched the anchor, i.e. this caller lost the
    /// race or the state never existed. A committed transition also
    /// queues a decision exemplar; capture failures never affect the
    /// result.
    pub async fn mark_processed(
        &self,
        channel_id: &str,
        message_ts: &str,
        processed_by: &str,
        status: StateStatus,
        error_message: Option<String>,
    ) -> Result<bool, RepositoryError> {
        let update = ProcessedUpdate {
            status,
            processed_by: processed_by.to_string(),
            processed_at: Utc::now(),
            error_message: error_message.clone(),
        };

        let transitioned = self
            .repository
            .mark_processed(channel_id, message_ts, &update)
            .await?;

        if transitioned {
            info!(
                "State at {}/{} marked {} by {}",
                channel_id, message_ts, status, processed_by
            );
            if let Some(sink) = &self.exemplar_sink {
                sink.capture(DecisionExemplar {
                    channel_id: channel_id.to_string(),
                    message_ts: message_ts.to_string(),
                    status: status.to_string(),
                    processed_by: processed_by.to_string(),
                    processed_at: update.processed_at,
                    error_message,
                });
            }
        }

        Ok(transitioned)
    }

    /// Shallow-merges `partial` into the payload at the anchor. `false`
    /// covers both "no such state" and "storage failed"; edits are
    /// advisory and the caller retries by re-submitting.
    pub async fn update_payload(
        &self,
        channel_id: &str,
        message_ts: &str,
        partial: &serde_json::Value,
    ) -> bool {
        match self
            .repository
            .update_payload(channel_id, message_ts, partial)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                error!(
                    "Failed to update payload for {}/{}: {}",
                    channel_id, message_ts, e
                );
                false
            }
        }
    }

    /// Deletes expired states of every status and type. Returns how many
    /// rows were removed; storage failures are logged and count as zero so
    /// the sweep loop never dies.
    pub async fn cleanup_expired_states(&self) -> usize {
        match self.repository.delete_expired(Utc::now()).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to clean up expired interactive states: {}", e);
                0
            }
        }
    }
}
