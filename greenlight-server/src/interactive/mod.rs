//! Durable interactive states: records of artifacts waiting on a human
//! decision, shared by every human-in-the-loop flow in the service.

pub mod manager;
pub mod model;
pub mod repository;

pub use manager::InteractiveStateManager;
pub use model::{
    ArtifactType, InteractiveState, NewInteractiveState, StateId, StatePayload, StateStatus,
    StateType, SupervisorReviewPayload,
};
pub use repository::{
    InMemoryRepository, RepositoryError, SqliteRepository, StateRepository,
};
