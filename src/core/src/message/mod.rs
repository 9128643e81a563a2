//! Typed conversation messages.
//!
//! A [`Message`] is created empty and streaming, grows through
//! [`Message::append_content`] and ends with a one-way [`Message::close`].
//! Every variant projects itself for the renderer ([`Message::render`]) and
//! for the next model turn ([`Message::to_transcript_entry`]).

mod view;

pub use view::MessageView;

use quill_protocol::{ErrorKind, ErrorPayload, QuestionAnswer, TranscriptEntry};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Suffix joining a turn id to the id of its reasoning message.
pub const THINKING_SUFFIX: &str = "-thinking";

/// Id of the thinking message paired with `turn_id`.
///
/// Both the stream reconciler and [`ThinkingMessage`] go through this
/// function; nothing else builds thinking ids.
pub fn thinking_id(turn_id: &str) -> String {
    format!("{turn_id}{THINKING_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    Thinking,
    Tool,
    Question,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    AwaitingApproval,
    Applied,
    Rejected,
    Failed,
}

/// State shared by every variant.
#[derive(Debug, Clone)]
pub struct MessageCore {
    id: String,
    content: String,
    is_streaming: bool,
}

impl MessageCore {
    fn new(id: String) -> Self {
        Self {
            id,
            content: String::new(),
            is_streaming: true,
        }
    }

    fn append(&mut self, fragment: Option<&str>) {
        if !self.is_streaming {
            return;
        }
        self.content.push_str(fragment.unwrap_or(""));
    }

    fn replace(&mut self, content: String) {
        if !self.is_streaming {
            return;
        }
        self.content = content;
    }

    fn close(&mut self) {
        self.is_streaming = false;
    }
}

#[derive(Debug, Clone)]
pub struct AssistantMessage {
    core: MessageCore,
}

#[derive(Debug, Clone)]
pub struct ThinkingMessage {
    core: MessageCore,
}

#[derive(Debug, Clone)]
pub struct ToolMessage {
    core: MessageCore,
    pub tool_name: String,
    pub tool_call_id: String,
    pub status: ToolStatus,
    /// Presentation-only payload (preview, diff, listing). Never sent to the model.
    pub children: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct QuestionMessage {
    core: MessageCore,
    pub tool_call_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub answer: Option<QuestionAnswer>,
}

#[derive(Debug, Clone)]
pub struct ErrorMessage {
    core: MessageCore,
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub kind: ErrorKind,
}

/// Closed set of conversation message variants.
#[derive(Debug, Clone)]
pub enum Message {
    Assistant(AssistantMessage),
    Thinking(ThinkingMessage),
    Tool(ToolMessage),
    Question(QuestionMessage),
    Error(ErrorMessage),
}

impl Message {
    pub fn assistant(id: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage {
            core: MessageCore::new(id.into()),
        })
    }

    /// Empty reasoning message for `turn_id`; its id is `thinking_id(turn_id)`.
    pub fn thinking(turn_id: &str) -> Self {
        Self::Thinking(ThinkingMessage {
            core: MessageCore::new(thinking_id(turn_id)),
        })
    }

    pub fn tool(tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool(ToolMessage {
            core: MessageCore::new(Uuid::new_v4().to_string()),
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            status: ToolStatus::Running,
            children: None,
        })
    }

    pub fn question(
        tool_call_id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self::Question(QuestionMessage {
            core: MessageCore::new(Uuid::new_v4().to_string()),
            tool_call_id: tool_call_id.into(),
            question: question.into(),
            options,
            answer: None,
        })
    }

    /// Terminal error message; created closed with `content` as its body.
    pub fn error(
        tool_name: impl Into<String>,
        tool_call_id: Option<String>,
        error: &ErrorPayload,
        content: String,
    ) -> Self {
        let mut core = MessageCore::new(Uuid::new_v4().to_string());
        core.replace(content);
        core.close();
        Self::Error(ErrorMessage {
            core,
            tool_name: tool_name.into(),
            tool_call_id,
            kind: error.kind,
        })
    }

    fn core(&self) -> &MessageCore {
        match self {
            Self::Assistant(m) => &m.core,
            Self::Thinking(m) => &m.core,
            Self::Tool(m) => &m.core,
            Self::Question(m) => &m.core,
            Self::Error(m) => &m.core,
        }
    }

    fn core_mut(&mut self) -> &mut MessageCore {
        match self {
            Self::Assistant(m) => &mut m.core,
            Self::Thinking(m) => &mut m.core,
            Self::Tool(m) => &mut m.core,
            Self::Question(m) => &mut m.core,
            Self::Error(m) => &mut m.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Assistant(_) => Role::Assistant,
            Self::Thinking(_) => Role::Thinking,
            Self::Tool(_) => Role::Tool,
            Self::Question(_) => Role::Question,
            Self::Error(_) => Role::Error,
        }
    }

    pub fn content(&self) -> &str {
        &self.core().content
    }

    pub fn is_streaming(&self) -> bool {
        self.core().is_streaming
    }

    /// Append a fragment; a missing fragment counts as "". Ignored once closed.
    pub fn append_content(&mut self, fragment: Option<&str>) {
        self.core_mut().append(fragment);
    }

    /// Replace the whole content. Ignored once closed.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.core_mut().replace(content.into());
    }

    /// Whether a stream delta carrying `candidate_id` belongs to this message.
    pub fn is_match(&self, candidate_id: &str) -> bool {
        match self {
            Self::Thinking(m) => thinking_id(candidate_id) == m.core.id,
            _ => self.id() == candidate_id,
        }
    }

    /// Stop streaming. One way: nothing re-opens a closed message.
    pub fn close(&mut self) {
        self.core_mut().close();
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::Tool(m) => Some(&m.tool_call_id),
            Self::Question(m) => Some(&m.tool_call_id),
            Self::Error(m) => m.tool_call_id.as_deref(),
            Self::Assistant(_) | Self::Thinking(_) => None,
        }
    }

    pub fn as_tool_mut(&mut self) -> Option<&mut ToolMessage> {
        match self {
            Self::Tool(m) if m.core.is_streaming => Some(m),
            _ => None,
        }
    }

    pub fn as_question_mut(&mut self) -> Option<&mut QuestionMessage> {
        match self {
            Self::Question(m) if m.core.is_streaming => Some(m),
            _ => None,
        }
    }

    /// Projection sent to the model on the next turn; `None` when the
    /// variant carries nothing the model can use.
    pub fn to_transcript_entry(&self) -> Option<TranscriptEntry> {
        match self {
            Self::Assistant(m) if m.core.content.is_empty() => None,
            Self::Assistant(m) => Some(TranscriptEntry::assistant(m.core.content.clone())),
            Self::Thinking(_) => None,
            Self::Tool(m) => Some(TranscriptEntry::tool_result(
                m.tool_call_id.clone(),
                m.tool_name.clone(),
                m.core.content.clone(),
            )),
            Self::Question(m) => Some(TranscriptEntry::tool_result(
                m.tool_call_id.clone(),
                crate::tools::ASK_USER_TOOL,
                m.core.content.clone(),
            )),
            Self::Error(m) => m.tool_call_id.as_ref().map(|call_id| {
                TranscriptEntry::tool_result(
                    call_id.clone(),
                    m.tool_name.clone(),
                    m.core.content.clone(),
                )
            }),
        }
    }

    pub fn render(&self) -> MessageView {
        MessageView::from_message(self)
    }
}
