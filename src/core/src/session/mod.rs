//! Turn driver and the context every pipeline runs against.

mod locks;
mod pipeline;

pub use pipeline::{InvocationRecord, MutationPreview};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use quill_protocol::{StreamDelta, ToolDecision, TranscriptEntry};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::quill_config::QuillConfig;
use crate::reconcile::StreamReconciler;
use crate::resource::ResourceStore;
use crate::snapshot::{RestoreOutcome, SnapshotStore};
use crate::tools::{ToolContext, ToolRegistry, ToolSet};
use crate::transcript::Transcript;

use locks::PathLocks;

/// Everything the core needs, built once per conversation and passed by
/// reference.
pub struct AgentContext {
    pub config: Arc<QuillConfig>,
    pub documents: Arc<dyn ResourceStore>,
    pub snapshots: SnapshotStore,
    pub transcript: Transcript,
    pub tools: ToolSet,
    locks: PathLocks,
}

impl AgentContext {
    pub fn new(
        config: QuillConfig,
        documents: Arc<dyn ResourceStore>,
        transcript: Transcript,
    ) -> CoreResult<Self> {
        Self::with_registry(config, documents, transcript, &ToolRegistry::new())
    }

    pub fn with_registry(
        config: QuillConfig,
        documents: Arc<dyn ResourceStore>,
        transcript: Transcript,
        registry: &ToolRegistry,
    ) -> CoreResult<Self> {
        if config.debug.enabled {
            crate::enable_debug_from_config();
        }
        let tool_ctx = ToolContext {
            documents: documents.clone(),
            artifacts: config.artifacts.clone(),
            web: config.web.search.clone(),
        };
        let tools = registry
            .build_tools(tool_ctx, &config.tools)
            .map_err(CoreError::Configuration)?;
        let snapshots = SnapshotStore::new(documents.clone(), documents.clone(), &config.snapshots.dir)?;
        tracing::info!(
            tools = tools.len(),
            policy = ?config.approvals.policy,
            lock_paths = config.tools.lock_paths,
            debug = config.debug_enabled(),
            "agent context ready"
        );
        Ok(Self {
            config: Arc::new(config),
            documents,
            snapshots,
            transcript,
            tools,
            locks: PathLocks::new(),
        })
    }
}

/// Result of driving one model turn to completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnSummary {
    pub turn_id: String,
    /// Messages the reconciler opened and closed, in creation order.
    pub closed_messages: Vec<String>,
    /// `(call_id, summary)` in completion order.
    pub tool_results: Vec<(String, String)>,
}

pub struct Session {
    ctx: Arc<AgentContext>,
    ledger: Mutex<Vec<InvocationRecord>>,
}

impl Session {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self {
            ctx,
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    pub async fn push_user(&self, text: impl Into<String>) {
        self.ctx.transcript.push_user(text).await;
    }

    /// Model input for the next turn.
    pub async fn next_turn_input(&self) -> Vec<TranscriptEntry> {
        self.ctx.transcript.entries().await
    }

    /// Drive one turn: reconcile `stream` and run every tool call it
    /// completes, all on the calling task. Returns once the stream has ended
    /// and every pipeline has finalized.
    pub async fn run_turn<S>(&self, turn_id: &str, stream: S) -> TurnSummary
    where
        S: Stream<Item = StreamDelta>,
    {
        let ctx = self.ctx.as_ref();
        let mut stream = std::pin::pin!(stream);
        let mut reconciler = StreamReconciler::new(&ctx.transcript);
        let mut pipelines = FuturesUnordered::new();
        let mut summary = TurnSummary {
            turn_id: turn_id.to_string(),
            ..TurnSummary::default()
        };
        let mut stream_done = false;
        tracing::info!(turn_id, "turn started");

        loop {
            tokio::select! {
                delta = stream.next(), if !stream_done => match delta {
                    Some(delta) => {
                        if let Some(call) = reconciler.apply(delta).await {
                            pipelines.push(pipeline::run_pipeline(ctx, call));
                        }
                    }
                    None => {
                        stream_done = true;
                        summary.closed_messages = reconciler.finish().await;
                    }
                },
                Some(outcome) = pipelines.next(), if !pipelines.is_empty() => {
                    summary
                        .tool_results
                        .push((outcome.record.tool_call_id.clone(), outcome.summary));
                    self.record(outcome.record);
                }
                else => break,
            }
        }

        tracing::info!(
            turn_id,
            messages = summary.closed_messages.len(),
            tool_calls = summary.tool_results.len(),
            "turn finished"
        );
        summary
    }

    fn ledger(&self) -> MutexGuard<'_, Vec<InvocationRecord>> {
        match self.ledger.lock() {
            Ok(ledger) => ledger,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, record: InvocationRecord) {
        self.ledger().push(record);
    }

    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.ledger().clone()
    }

    /// Restore the document an applied invocation changed, then drop its
    /// snapshot. An invocation can be undone once.
    pub async fn undo(&self, call_id: &str) -> CoreResult<RestoreOutcome> {
        let target = self
            .ledger()
            .iter()
            .find(|record| record.tool_call_id == call_id && record.decision == ToolDecision::Applied)
            .and_then(|record| Some((record.snapshot_id.clone()?, record.resource_path.clone()?)));
        let Some((snapshot_id, path)) = target else {
            return Err(CoreError::NotFound(format!(
                "no undoable change for tool call `{call_id}`"
            )));
        };

        let outcome = self.ctx.snapshots.restore_snapshot(&snapshot_id, &path).await?;
        self.ctx.snapshots.delete_snapshot(&snapshot_id).await?;
        for record in self.ledger().iter_mut() {
            if record.snapshot_id.as_deref() == Some(snapshot_id.as_str()) {
                record.snapshot_id = None;
            }
        }
        tracing::info!(%call_id, path = %path, ?outcome, "tool call undone");
        Ok(outcome)
    }

    /// Delete stored snapshots no undoable invocation refers to.
    pub async fn prune_snapshots(&self) -> CoreResult<usize> {
        let keep: HashSet<String> = self
            .ledger()
            .iter()
            .filter(|record| record.decision == ToolDecision::Applied)
            .filter_map(|record| record.snapshot_id.clone())
            .collect();
        self.ctx.snapshots.prune(&keep).await
    }
}
