//! Shared building blocks for the Greenlight approval service: outbound
//! API clients, LLM review types, and decision exemplar capture.

pub mod exemplar;
pub mod queue;
pub mod review;
pub mod servicenow;
pub mod slack;

pub use exemplar::{DecisionExemplar, ExemplarSink};
pub use queue::{ApprovalJob, QueueConfig, QueuePublisher};
pub use review::{IssueSeverity, LlmReview, ReviewIssue, ReviewVerdict};
pub use servicenow::{ServiceNowClient, ServiceNowConfig};
pub use slack::SlackClient;
