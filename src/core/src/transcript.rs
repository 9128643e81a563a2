use quill_protocol::TranscriptEntry;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::approval::ApprovalRegistry;
use crate::error::{CoreError, CoreResult};
use crate::message::{Message, MessageView, Role};

/// Notification pushed to the renderer after every transcript mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenderEvent {
    Upserted { view: MessageView },
    Evicted { id: String },
}

enum TranscriptItem {
    User(String),
    Message(Message),
}

/// Ordered owner of the visible conversation.
///
/// Pipelines and the reconciler hold message ids, not messages; every
/// mutation goes through [`Transcript::update`] so the renderer sees it.
pub struct Transcript {
    items: Mutex<Vec<TranscriptItem>>,
    approvals: ApprovalRegistry,
    outbound: Option<mpsc::Sender<RenderEvent>>,
}

impl Transcript {
    pub fn new(outbound: mpsc::Sender<RenderEvent>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            approvals: ApprovalRegistry::new(),
            outbound: Some(outbound),
        }
    }

    /// A transcript nobody renders.
    pub fn detached() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            approvals: ApprovalRegistry::new(),
            outbound: None,
        }
    }

    pub fn approvals(&self) -> &ApprovalRegistry {
        &self.approvals
    }

    pub async fn push_user(&self, text: impl Into<String>) {
        self.items
            .lock()
            .await
            .push(TranscriptItem::User(text.into()));
    }

    /// Hand a new message to the transcript.
    ///
    /// Fails when the id is taken or another message already owns the same
    /// tool call id.
    pub async fn insert(&self, message: Message) -> CoreResult<()> {
        let view = {
            let mut items = self.items.lock().await;
            for item in items.iter() {
                let TranscriptItem::Message(existing) = item else {
                    continue;
                };
                if existing.id() == message.id() {
                    return Err(CoreError::Validation(format!(
                        "message id `{}` already in transcript",
                        message.id()
                    )));
                }
                if let (Some(a), Some(b)) = (existing.tool_call_id(), message.tool_call_id()) {
                    if a == b {
                        return Err(CoreError::Validation(format!(
                            "tool call `{a}` already has a message"
                        )));
                    }
                }
            }
            let view = message.render();
            items.push(TranscriptItem::Message(message));
            view
        };
        self.emit(RenderEvent::Upserted { view });
        Ok(())
    }

    /// Mutate one message in place and publish its new view.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        let (result, view) = {
            let mut items = self.items.lock().await;
            let message = items.iter_mut().find_map(|item| match item {
                TranscriptItem::Message(m) if m.id() == id => Some(m),
                _ => None,
            })?;
            let result = f(message);
            (result, message.render())
        };
        self.emit(RenderEvent::Upserted { view });
        Some(result)
    }

    pub async fn get(&self, id: &str) -> Option<Message> {
        let items = self.items.lock().await;
        items.iter().find_map(|item| match item {
            TranscriptItem::Message(m) if m.id() == id => Some(m.clone()),
            _ => None,
        })
    }

    pub async fn find_by_call(&self, call_id: &str) -> Option<Message> {
        let items = self.items.lock().await;
        items.iter().find_map(|item| match item {
            TranscriptItem::Message(m) if m.tool_call_id() == Some(call_id) => Some(m.clone()),
            _ => None,
        })
    }

    /// Id of the streaming message of `role` that claims `candidate_id`.
    pub async fn find_live(&self, role: Role, candidate_id: &str) -> Option<String> {
        let items = self.items.lock().await;
        items.iter().find_map(|item| match item {
            TranscriptItem::Message(m)
                if m.role() == role && m.is_streaming() && m.is_match(candidate_id) =>
            {
                Some(m.id().to_string())
            }
            _ => None,
        })
    }

    pub async fn messages(&self) -> Vec<Message> {
        let items = self.items.lock().await;
        items
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::Message(m) => Some(m.clone()),
                TranscriptItem::User(_) => None,
            })
            .collect()
    }

    /// Model input for the next turn, in conversation order.
    pub async fn entries(&self) -> Vec<TranscriptEntry> {
        let items = self.items.lock().await;
        items
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::User(text) => Some(TranscriptEntry::user(text.clone())),
                TranscriptItem::Message(m) => m.to_transcript_entry(),
            })
            .collect()
    }

    /// Drop a message. A gate still waiting on it resolves as rejected.
    pub async fn evict(&self, id: &str) -> bool {
        let removed = {
            let mut items = self.items.lock().await;
            let Some(index) = items.iter().position(|item| {
                matches!(item, TranscriptItem::Message(m) if m.id() == id)
            }) else {
                return false;
            };
            items.remove(index)
        };
        if let TranscriptItem::Message(message) = removed {
            if let Some(call_id) = message.tool_call_id() {
                self.approvals.forget(call_id);
            }
        }
        self.emit(RenderEvent::Evicted { id: id.to_string() });
        true
    }

    fn emit(&self, event: RenderEvent) {
        let Some(outbound) = self.outbound.as_ref() else {
            return;
        };
        match outbound.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("backpressure: dropping render event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
