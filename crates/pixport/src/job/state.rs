use serde::{Deserialize, Serialize};

/// Lifecycle stage of a single item.
///
/// Wire tokens are lower case; the empty string means [`WorkflowState::Empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Not yet attempted. The initial state.
    #[serde(rename = "")]
    Empty,
    /// Explicitly has no source file (e.g. a collection-level record).
    /// Terminal; never dispatched for processing.
    Structural,
    /// Conversion, upload, or validation failed.
    Failed,
    /// Converted and uploaded; pending finalization.
    Succeeded,
    /// Succeeded in an earlier run and confirmed downstream.
    Ingested,
    /// Declared to have a file that could not be found. Reported in
    /// preference to other simultaneous failure reasons.
    Missing,
}

impl WorkflowState {
    /// Parses a manifest token. Case-insensitive; blank means `Empty`.
    pub fn parse(token: &str) -> Option<WorkflowState> {
        let token = token.trim();
        if token.is_empty() {
            return Some(WorkflowState::Empty);
        }
        match token.to_ascii_lowercase().as_str() {
            "structural" => Some(WorkflowState::Structural),
            "failed" => Some(WorkflowState::Failed),
            "succeeded" => Some(WorkflowState::Succeeded),
            "ingested" => Some(WorkflowState::Ingested),
            "missing" => Some(WorkflowState::Missing),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            WorkflowState::Empty => "",
            WorkflowState::Structural => "structural",
            WorkflowState::Failed => "failed",
            WorkflowState::Succeeded => "succeeded",
            WorkflowState::Ingested => "ingested",
            WorkflowState::Missing => "missing",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}
