//! Persistence for interactive states.
//!
//! Two implementations: [`SqliteRepository`] for production and
//! [`InMemoryRepository`] for tests and ephemeral development runs. Both
//! enforce the same contract, most importantly that the pending-to-terminal
//! transition in [`StateRepository::mark_processed`] is a single guarded
//! write: of any number of concurrent callers, exactly one observes `true`.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::interactive::model::{InteractiveState, StateId, StateStatus, StateType};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("corrupt {what} in state store")]
    Corruption { what: &'static str },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        RepositoryError::Corruption { what }
    }
}

/// Audit fields applied by the guarded pending-to-terminal transition.
#[derive(Debug, Clone)]
pub struct ProcessedUpdate {
    pub status: StateStatus,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Persists a state. A second save for the same `(channel_id,
    /// message_ts)` anchor replaces the earlier row; producers re-draft
    /// artifacts for the same conversation message.
    async fn save(&self, state: &InteractiveState) -> Result<(), RepositoryError>;

    /// Fetches a state by id with no status or expiry filter. Action
    /// endpoints need to see already-processed and expired rows to report
    /// them accurately.
    async fn get_by_id(&self, id: &StateId) -> Result<Option<InteractiveState>, RepositoryError>;

    /// Fetches the state anchored at `(channel_id, message_ts)` if it is
    /// still pending and unexpired at `now`. `state_type`, when given,
    /// must also match.
    async fn get_pending_by_channel_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        state_type: Option<&StateType>,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractiveState>, RepositoryError>;

    /// Lists pending, unexpired states of one type, newest first.
    async fn list_pending_by_type(
        &self,
        state_type: &StateType,
        now: DateTime<Utc>,
    ) -> Result<Vec<InteractiveState>, RepositoryError>;

    /// Moves a pending state to a terminal status, stamping the audit
    /// fields and bumping the version. The status check and the write are
    /// one atomic operation; returns `false` when no row was pending at
    /// the anchor, which is how a raced caller learns it lost.
    async fn mark_processed(
        &self,
        channel_id: &str,
        message_ts: &str,
        update: &ProcessedUpdate,
    ) -> Result<bool, RepositoryError>;

    /// Shallow-merges `partial` into the payload of the state at the
    /// anchor, bumping the version. Returns `false` if no such state
    /// exists or a concurrent write invalidated the merge.
    async fn update_payload(
        &self,
        channel_id: &str,
        message_ts: &str,
        partial: &serde_json::Value,
    ) -> Result<bool, RepositoryError>;

    /// Deletes every state whose expiry has passed, regardless of status.
    /// Returns the number of rows removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;
}
