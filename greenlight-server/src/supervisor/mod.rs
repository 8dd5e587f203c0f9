//! The supervisor review flow: human approval decisions over AI-drafted
//! artifacts, and delivery of the approved ones.

pub mod actions;
pub mod executor;

pub use actions::{ApprovalError, SupervisorActions};
pub use executor::{ArtifactExecutor, ExecutionError, LiveArtifactExecutor};
