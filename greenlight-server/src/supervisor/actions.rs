//! Approve and reject operations for supervisor review states.
//!
//! Approval executes the artifact before committing the transition. A
//! crash between the two leaves the state pending, so the queue redelivers
//! and the side effect may happen twice; the recorded decision can never
//! happen twice, because the commit is a guarded single write. Rejection
//! inverts the trade: it never touches the artifact at all.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::interactive::manager::InteractiveStateManager;
use crate::interactive::model::{InteractiveState, StateId, StateStatus, StateType};
use crate::interactive::repository::RepositoryError;

use super::executor::{ArtifactExecutor, ExecutionError};

#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Covers "never existed", "expired away", "wrong type", and "a
    /// concurrent decision won". Callers cannot act differently on those,
    /// and collapsing them avoids leaking store internals to reviewers.
    #[error("supervisor state {0} not found or already processed")]
    StateNotFound(StateId),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

pub struct SupervisorActions {
    manager: Arc<InteractiveStateManager>,
    executor: Arc<dyn ArtifactExecutor>,
}

impl SupervisorActions {
    pub fn new(manager: Arc<InteractiveStateManager>, executor: Arc<dyn ArtifactExecutor>) -> Self {
        Self { manager, executor }
    }

    /// Delivers the drafted artifact, then commits the approval.
    pub async fn approve(
        &self,
        state_id: &StateId,
        reviewer: &str,
    ) -> Result<InteractiveState, ApprovalError> {
        let state = self.lookup_pending_review(state_id).await?;
        let Some(payload) = state.payload.as_supervisor_review() else {
            return Err(ApprovalError::StateNotFound(state_id.clone()));
        };

        self.executor.execute(payload).await?;

        let transitioned = self
            .manager
            .mark_processed(
                &state.channel_id,
                &state.message_ts,
                reviewer,
                StateStatus::Approved,
                None,
            )
            .await?;
        if !transitioned {
            // Another decision committed between our read and this write.
            // The artifact may have been delivered, the approval was not
            // recorded.
            return Err(ApprovalError::StateNotFound(state_id.clone()));
        }

        info!("Supervisor state {} approved by {}", state_id, reviewer);
        Ok(transitioned_copy(state, reviewer, StateStatus::Approved))
    }

    /// Commits a rejection. The drafted artifact is never executed.
    pub async fn reject(
        &self,
        state_id: &StateId,
        reviewer: &str,
    ) -> Result<InteractiveState, ApprovalError> {
        let state = self.lookup_pending_review(state_id).await?;

        let transitioned = self
            .manager
            .mark_processed(
                &state.channel_id,
                &state.message_ts,
                reviewer,
                StateStatus::Rejected,
                None,
            )
            .await?;
        if !transitioned {
            return Err(ApprovalError::StateNotFound(state_id.clone()));
        }

        info!("Supervisor state {} rejected by {}", state_id, reviewer);
        Ok(transitioned_copy(state, reviewer, StateStatus::Rejected))
    }

    async fn lookup_pending_review(
        &self,
        state_id: &StateId,
    ) -> Result<InteractiveState, ApprovalError> {
        let Some(state) = self.manager.get_state_by_id(state_id).await else {
            return Err(ApprovalError::StateNotFound(state_id.clone()));
        };
        if state.state_type != StateType::SupervisorReview
            || state.status != StateStatus::Pending
        {
            return Err(ApprovalError::StateNotFound(state_id.clone()));
        }
        Ok(state)
    }
}

/// The caller gets back the state as this decision left it, without a
/// second read. Audit timestamps here are informational; the row is
/// authoritative.
fn transitioned_copy(
    state: InteractiveState,
    reviewer: &str,
    status: StateStatus,
) -> InteractiveState {
    InteractiveState {
        status,
        processed_by: Some(reviewer.to_string()),
        processed_at: Some(Utc::now()),
        version: state.version + 1,
        ..state
    }
}
