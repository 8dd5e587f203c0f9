use serde::{Deserialize, Serialize};
use std::fmt;

/// LLM reviewer's assessment of a drafted artifact.
///
/// Produced by the upstream review pipeline and attached to a pending
/// supervisor state as read-only context for the human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmReview {
    pub verdict: ReviewVerdict,
    /// Reviewer confidence in the verdict, 0.0 to 1.0.
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

/// Classification of a drafted artifact by the LLM reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewVerdict {
    /// Artifact is safe to send as drafted.
    Pass,
    /// Artifact needs edits before sending.
    Revise,
    /// Artifact must not be sent without human intervention.
    Critical,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewVerdict::Pass => "pass",
            ReviewVerdict::Revise => "revise",
            ReviewVerdict::Critical => "critical",
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single issue flagged by the LLM reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub description: String,
    pub recommendation: String,
}

/// Severity of a flagged issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_deserializes_camel_case_wire_format() {
        let json = r#"{
            "verdict": "revise",
            "confidence": 0.82,
            "summary": "Tone is too casual for an outage update",
            "issues": [
                {
                    "severity": "medium",
                    "description": "Missing ETA for the fix",
                    "recommendation": "Add the current restoration estimate"
                }
            ]
        }"#;

        let review: LlmReview = serde_json::from_str(json).unwrap();
        assert_eq!(review.verdict, ReviewVerdict::Revise);
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].severity, IssueSeverity::Medium);
    }

    #[test]
    fn test_issues_default_to_empty() {
        let json = r#"{"verdict": "pass", "confidence": 0.99, "summary": "Looks good"}"#;
        let review: LlmReview = serde_json::from_str(json).unwrap();
        assert_eq!(review.verdict, ReviewVerdict::Pass);
        assert!(review.issues.is_empty());
    }

    #[test]
    fn test_verdict_round_trips() {
        for verdict in [
            ReviewVerdict::Pass,
            ReviewVerdict::Revise,
            ReviewVerdict::Critical,
        ] {
            let json = serde_json::to_string(&verdict).unwrap();
            assert_eq!(json, format!("\"{}\"", verdict.as_str()));
            let back: ReviewVerdict = serde_json::from_str(&json).unwrap();
            assert_eq!(back, verdict);
        }
    }
}
