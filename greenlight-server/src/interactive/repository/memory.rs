//! In-memory repository for tests and ephemeral development runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ProcessedUpdate, RepositoryError, StateRepository};
use crate::interactive::model::{InteractiveState, StateId, StateStatus, StateType};

#[derive(Default)]
pub struct InMemoryRepository {
    states: RwLock<HashMap<StateId, InteractiveState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepository for InMemoryRepository {
    async fn save(&self, state: &InteractiveState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        // The (channel_id, message_ts) anchor is unique; a re-save replaces
        // the earlier row just like the SQLite upsert does.
        states.retain(|_, existing| {
            existing.channel_id != state.channel_id || existing.message_ts != state.message_ts
        });
        states.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &StateId) -> Result<Option<InteractiveState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(id).cloned())
    }

    async fn get_pending_by_channel_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        state_type: Option<&StateType>,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractiveState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states
            .values()
            .find(|state| {
                state.channel_id == channel_id
                    && state.message_ts == message_ts
                    && state.is_pending_at(now)
                    && state_type.map_or(true, |wanted| &state.state_type == wanted)
            })
            .cloned())
    }

    async fn list_pending_by_type(
        &self,
        state_type: &StateType,
        now: DateTime<Utc>,
    ) -> Result<Vec<InteractiveState>, RepositoryError> {
        let states = self.states.read().await;
        let mut pending: Vec<InteractiveState> = states
            .values()
            .filter(|state| &state.state_type == state_type && state.is_pending_at(now))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn mark_processed(
        &self,
        channel_id: &str,
        message_ts: &str,
        update: &ProcessedUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut states = self.states.write().await;
        let Some(state) = states.values_mut().find(|state| {
            state.channel_id == channel_id
                && state.message_ts == message_ts
                && state.status == StateStatus::Pending
        }) else {
            return Ok(false);
        };

        state.status = update.status;
        state.processed_by = Some(update.processed_by.clone());
        state.processed_at = Some(update.processed_at);
        state.error_message = update.error_message.clone();
        state.version += 1;
        Ok(true)
    }

    async fn update_payload(
        &self,
        channel_id: &str,
        message_ts: &str,
        partial: &serde_json::Value,
    ) -> Result<bool, RepositoryError> {
        let serde_json::Value::Object(partial_map) = partial else {
            return Ok(false);
        };

        let mut states = self.states.write().await;
        let Some(state) = states.values_mut().find(|state| {
            state.channel_id == channel_id && state.message_ts == message_ts
        }) else {
            return Ok(false);
        };

        let mut payload_value = serde_json::to_value(&state.payload)
            .map_err(|_| RepositoryError::corruption("state payload"))?;
        let serde_json::Value::Object(payload_map) = &mut payload_value else {
            return Ok(false);
        };
        for (key, value) in partial_map {
            payload_map.insert(key.clone(), value.clone());
        }

        state.payload = serde_json::from_value(payload_value)
            .map_err(|_| RepositoryError::corruption("state payload"))?;
        state.version += 1;
        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, state| state.expires_at >= now);
        Ok(before - states.len())
    }
}
