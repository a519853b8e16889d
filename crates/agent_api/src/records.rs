use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend-reported run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    Error,
}

impl RunStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "stopped" => Self::Stopped,
            "failed" => Self::Failed,
            "error" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    /// True while the run may still emit frames.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Durable message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    Tool,
    Status,
}

/// One durable, externally persisted conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: Value,
    #[serde(default)]
    pub created_at: String,
}

/// Response payload from the start-run endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartedRun {
    pub agent_run_id: String,
}

/// Response payload from the create-thread endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedThread {
    pub thread_id: String,
}

/// Response payload from the get-run-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunStatusResponse {
    pub status: RunStatus,
}
