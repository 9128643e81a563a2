use quill_protocol::{ErrorKind, QuestionAnswer};
use serde::Serialize;
use serde_json::Value;

use super::{Message, Role, ToolStatus};

/// Presentational projection of a [`Message`], recomputed on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    /// Whether the renderer should show the body open by default.
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
    /// True while the renderer should offer the apply/reject (or answer) controls.
    pub awaiting_decision: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<QuestionAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl MessageView {
    fn base(message: &Message) -> Self {
        Self {
            id: message.id().to_string(),
            role: message.role(),
            content: message.content().to_string(),
            is_streaming: message.is_streaming(),
            expanded: true,
            tool_name: None,
            tool_call_id: message.tool_call_id().map(str::to_string),
            status: None,
            awaiting_decision: false,
            children: None,
            question: None,
            options: Vec::new(),
            answer: None,
            error_kind: None,
        }
    }

    pub(super) fn from_message(message: &Message) -> Self {
        let mut view = Self::base(message);
        match message {
            Message::Assistant(_) => {}
            Message::Thinking(m) => {
                view.expanded = m.core.is_streaming;
            }
            Message::Tool(m) => {
                let awaiting = m.status == ToolStatus::AwaitingApproval;
                view.tool_name = Some(m.tool_name.clone());
                view.status = Some(m.status);
                view.children = m.children.clone();
                view.awaiting_decision = awaiting && m.core.is_streaming;
                view.expanded = awaiting;
            }
            Message::Question(m) => {
                view.question = Some(m.question.clone());
                view.options = m.options.clone();
                view.answer = m.answer.clone();
                view.awaiting_decision = m.answer.is_none() && m.core.is_streaming;
            }
            Message::Error(m) => {
                view.tool_name = Some(m.tool_name.clone());
                view.error_kind = Some(m.kind);
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_collapses_after_close() {
        let mut msg = Message::thinking("t");
        assert!(msg.render().expanded);
        msg.close();
        let view = msg.render();
        assert!(!view.expanded);
        assert!(!view.is_streaming);
    }

    #[test]
    fn tool_awaiting_approval_offers_controls() {
        let mut msg = Message::tool("write_document", "call-1");
        if let Some(tool) = msg.as_tool_mut() {
            tool.status = ToolStatus::AwaitingApproval;
            tool.children = Some(serde_json::json!({ "path": "a.md" }));
        }
        let view = msg.render();
        assert!(view.awaiting_decision);
        assert_eq!(view.status, Some(ToolStatus::AwaitingApproval));
        assert_eq!(view.children.as_ref().unwrap()["path"], "a.md");

        msg.close();
        assert!(!msg.render().awaiting_decision);
    }

    #[test]
    fn view_serializes_without_empty_fields() {
        let msg = Message::assistant("a-1");
        let json = serde_json::to_value(msg.render()).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_name").is_none());
        assert!(json.get("options").is_none());
    }
}
