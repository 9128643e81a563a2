use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// One incremental fragment of model output within a turn.
///
/// `id` is the identity the fragment belongs to:
/// - `text`: the assistant message id
/// - `reasoning`: the turn id (the thinking message id is derived from it)
/// - `tool-call-*`: the tool call id assigned by the model runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    pub id: String,
    #[serde(flatten)]
    pub payload: DeltaPayload,
}

/// Payload kinds carried by a [`StreamDelta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeltaPayload {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    ToolCallStart {
        tool_name: String,
    },
    ToolCallArgsDelta {
        #[serde(default)]
        fragment: String,
    },
    ToolCallEnd,
}

impl StreamDelta {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: DeltaPayload::Text {
                text: Some(text.into()),
            },
        }
    }

    pub fn reasoning(turn_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: turn_id.into(),
            payload: DeltaPayload::Reasoning {
                text: Some(text.into()),
            },
        }
    }

    pub fn tool_call_start(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: call_id.into(),
            payload: DeltaPayload::ToolCallStart {
                tool_name: tool_name.into(),
            },
        }
    }

    pub fn tool_call_args(call_id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: call_id.into(),
            payload: DeltaPayload::ToolCallArgsDelta {
                fragment: fragment.into(),
            },
        }
    }

    pub fn tool_call_end(call_id: impl Into<String>) -> Self {
        Self {
            id: call_id.into(),
            payload: DeltaPayload::ToolCallEnd,
        }
    }
}

/// Encode a delta as a single JSON line (no trailing newline).
pub fn encode_delta(delta: &StreamDelta) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(delta)?)
}

/// Decode one JSON line of a recorded stream.
pub fn decode_delta(line: &str) -> Result<StreamDelta, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    let delta: StreamDelta = serde_json::from_str(trimmed)?;
    if delta.id.trim().is_empty() {
        return Err(ProtocolError::MissingIdentity);
    }
    Ok(delta)
}
