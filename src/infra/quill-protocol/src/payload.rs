use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Human (or policy) decision on a previewed side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Apply,
    Reject,
}

impl Decision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apply" | "accept" | "approve" | "yes" | "y" => Some(Self::Apply),
            "reject" | "decline" | "deny" | "no" | "n" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Outcome of an interactive question put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionAnswer {
    Answered { text: String },
    Dismissed,
}

/// Terminal decision recorded for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDecision {
    Applied,
    Rejected,
    Errored,
}

/// Error taxonomy surfaced to the model and the renderer.
///
/// A rejection is not an error and has no kind here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Configuration,
    Io,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Final content of a tool message. Enough to re-render history after reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool: String,
    pub call_id: String,
    pub success: bool,
    pub decision: ToolDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl ToolResultPayload {
    pub fn applied(
        tool: impl Into<String>,
        call_id: impl Into<String>,
        result: Value,
        snapshot_id: Option<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            call_id: call_id.into(),
            success: true,
            decision: ToolDecision::Applied,
            result: Some(result),
            error: None,
            snapshot_id,
        }
    }

    pub fn rejected(tool: impl Into<String>, call_id: impl Into<String>, reason: &str) -> Self {
        Self {
            tool: tool.into(),
            call_id: call_id.into(),
            success: false,
            decision: ToolDecision::Rejected,
            result: Some(serde_json::json!({ "cancelled": true, "reason": reason })),
            error: None,
            snapshot_id: None,
        }
    }

    pub fn errored(
        tool: impl Into<String>,
        call_id: impl Into<String>,
        error: ErrorPayload,
        snapshot_id: Option<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            call_id: call_id.into(),
            success: false,
            decision: ToolDecision::Errored,
            result: None,
            error: Some(error),
            snapshot_id,
        }
    }

    /// Compact JSON handed back to the model turn.
    pub fn summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"tool\":\"{}\",\"success\":{}}}",
                self.tool, self.success
            )
        })
    }
}
