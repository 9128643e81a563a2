//! Routes ordered stream deltas onto live messages.
//!
//! Text and reasoning fragments land on the streaming message that claims
//! their id, creating it on first sight. Tool-call fragments are buffered
//! here until `tool-call-end`; the completed call is handed back to the
//! caller, which starts a pipeline for it.

use std::collections::HashMap;

use quill_protocol::{DeltaPayload, StreamDelta};

use crate::message::{Message, Role};
use crate::transcript::Transcript;

/// A tool call whose arguments have fully streamed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedToolCall {
    pub call_id: String,
    pub tool_name: String,
    /// Concatenated argument fragments, not yet parsed.
    pub arguments: String,
}

struct PendingToolCall {
    tool_name: String,
    arguments: String,
}

pub struct StreamReconciler<'a> {
    transcript: &'a Transcript,
    opened: Vec<String>,
    pending: HashMap<String, PendingToolCall>,
    order: Vec<String>,
}

impl<'a> StreamReconciler<'a> {
    pub fn new(transcript: &'a Transcript) -> Self {
        Self {
            transcript,
            opened: Vec::new(),
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Apply one delta. Returns the call when this delta completed one.
    pub async fn apply(&mut self, delta: StreamDelta) -> Option<CompletedToolCall> {
        let StreamDelta { id, payload } = delta;
        match payload {
            DeltaPayload::Text { text } => {
                self.append(Role::Assistant, &id, text.as_deref()).await;
                None
            }
            DeltaPayload::Reasoning { text } => {
                self.append(Role::Thinking, &id, text.as_deref()).await;
                None
            }
            DeltaPayload::ToolCallStart { tool_name } => {
                if self.pending.contains_key(&id) {
                    tracing::warn!(call_id = %id, "duplicate tool-call-start ignored");
                    return None;
                }
                self.order.push(id.clone());
                self.pending.insert(
                    id,
                    PendingToolCall {
                        tool_name,
                        arguments: String::new(),
                    },
                );
                None
            }
            DeltaPayload::ToolCallArgsDelta { fragment } => {
                match self.pending.get_mut(&id) {
                    Some(call) => call.arguments.push_str(&fragment),
                    None => tracing::warn!(call_id = %id, "arguments for unknown tool call dropped"),
                }
                None
            }
            DeltaPayload::ToolCallEnd => {
                let Some(call) = self.pending.remove(&id) else {
                    tracing::warn!(call_id = %id, "tool-call-end for unknown tool call");
                    return None;
                };
                self.order.retain(|pending| pending != &id);
                tracing::debug!(call_id = %id, tool = %call.tool_name, "tool call completed");
                Some(CompletedToolCall {
                    call_id: id,
                    tool_name: call.tool_name,
                    arguments: call.arguments,
                })
            }
        }
    }

    async fn append(&mut self, role: Role, id: &str, fragment: Option<&str>) {
        let target = match self.transcript.find_live(role, id).await {
            Some(message_id) => message_id,
            None => {
                let message = match role {
                    Role::Thinking => Message::thinking(id),
                    _ => Message::assistant(id),
                };
                let message_id = message.id().to_string();
                if let Err(err) = self.transcript.insert(message).await {
                    tracing::warn!(id, error = %err, "late fragment for a closed message dropped");
                    return;
                }
                self.opened.push(message_id.clone());
                message_id
            }
        };
        self.transcript
            .update(&target, |message| message.append_content(fragment))
            .await;
    }

    /// End of stream: close every message this turn opened.
    ///
    /// Tool calls that never saw `tool-call-end` are dropped. Returns the
    /// ids of the closed messages in creation order.
    pub async fn finish(&mut self) -> Vec<String> {
        for call_id in &self.order {
            if let Some(call) = self.pending.get(call_id) {
                tracing::warn!(
                    call_id = %call_id,
                    tool = %call.tool_name,
                    "stream ended before tool call completed; dropping it"
                );
            }
        }
        self.pending.clear();
        self.order.clear();
        let opened = std::mem::take(&mut self.opened);
        for id in &opened {
            self.transcript.update(id, |message| message.close()).await;
        }
        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::thinking_id;

    #[tokio::test]
    async fn text_and_reasoning_share_a_turn_id() {
        let transcript = Transcript::detached();
        let mut reconciler = StreamReconciler::new(&transcript);
        reconciler.apply(StreamDelta::reasoning("t1", "think ")).await;
        reconciler.apply(StreamDelta::text("t1", "say ")).await;
        reconciler.apply(StreamDelta::reasoning("t1", "more")).await;
        reconciler.apply(StreamDelta::text("t1", "it")).await;
        let closed = reconciler.finish().await;

        assert_eq!(closed, vec!["t1-thinking".to_string(), "t1".to_string()]);
        let thinking = transcript.get(&thinking_id("t1")).await.unwrap();
        assert_eq!(thinking.content(), "think more");
        assert!(!thinking.is_streaming());
        assert_eq!(transcript.get("t1").await.unwrap().content(), "say it");
    }

    #[tokio::test]
    async fn interleaved_assistant_messages_keep_their_own_fragments() {
        let transcript = Transcript::detached();
        let mut reconciler = StreamReconciler::new(&transcript);
        reconciler.apply(StreamDelta::text("A", "A1 ")).await;
        reconciler.apply(StreamDelta::text("B", "B1 ")).await;
        reconciler.apply(StreamDelta::text("A", "A2")).await;
        reconciler.apply(StreamDelta::text("B", "B2")).await;
        let closed = reconciler.finish().await;

        assert_eq!(closed, vec!["A".to_string(), "B".to_string()]);
        let messages = transcript.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(transcript.get("A").await.unwrap().content(), "A1 A2");
        assert_eq!(transcript.get("B").await.unwrap().content(), "B1 B2");
        assert!(messages
            .iter()
            .all(|message| message.role() == Role::Assistant && !message.is_streaming()));
    }

    #[tokio::test]
    async fn tool_call_fragments_are_buffered_until_end() {
        let transcript = Transcript::detached();
        let mut reconciler = StreamReconciler::new(&transcript);
        assert!(reconciler
            .apply(StreamDelta::tool_call_start("c1", "read_document"))
            .await
            .is_none());
        reconciler.apply(StreamDelta::tool_call_args("c1", "{\"path\":")).await;
        reconciler.apply(StreamDelta::tool_call_args("c1", "\"a.md\"}")).await;
        let call = reconciler
            .apply(StreamDelta::tool_call_end("c1"))
            .await
            .expect("completed call");
        assert_eq!(call.tool_name, "read_document");
        assert_eq!(call.arguments, "{\"path\":\"a.md\"}");
        assert!(transcript.messages().await.is_empty());
    }

    #[tokio::test]
    async fn unfinished_tool_calls_are_dropped_at_finish() {
        let transcript = Transcript::detached();
        let mut reconciler = StreamReconciler::new(&transcript);
        reconciler
            .apply(StreamDelta::tool_call_start("c2", "write_document"))
            .await;
        reconciler.apply(StreamDelta::tool_call_args("c2", "{")).await;
        assert!(reconciler.finish().await.is_empty());
        assert!(transcript.find_by_call("c2").await.is_none());
    }

    #[tokio::test]
    async fn missing_text_counts_as_empty() {
        let transcript = Transcript::detached();
        let mut reconciler = StreamReconciler::new(&transcript);
        reconciler
            .apply(StreamDelta {
                id: "t9".into(),
                payload: DeltaPayload::Text { text: None },
            })
            .await;
        reconciler.apply(StreamDelta::text("t9", "ok")).await;
        reconciler.finish().await;
        assert_eq!(transcript.get("t9").await.unwrap().content(), "ok");
    }
}
