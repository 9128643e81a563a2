use std::sync::atomic::{AtomicBool, Ordering};

pub mod approval;
pub mod error;
pub mod message;
pub mod paths;
mod quill_config;
pub mod reconcile;
pub mod resource;
pub mod session;
pub mod snapshot;
pub mod tools;
pub mod transcript;

pub use approval::{ApprovalGate, ApprovalRegistry, GateId, GateOutcome, GateResolver};
pub use error::{CoreError, CoreResult};
pub use message::{thinking_id, Message, MessageView, Role, ToolStatus, THINKING_SUFFIX};
pub use quill_config::{
    ApprovalPolicy, ApprovalsConfig, ArtifactsConfig, DebugConfig, QuillConfig, SnapshotsConfig,
    ToolProviderConfig, ToolsConfig, WebConfig, WebSearchConfig,
};
pub use reconcile::{CompletedToolCall, StreamReconciler};
pub use resource::{ChildEntry, FsResourceStore, MemoryResourceStore, ResourceStore, StoreOp};
pub use session::{AgentContext, InvocationRecord, Session, TurnSummary};
pub use snapshot::{PriorState, RestoreOutcome, Snapshot, SnapshotStore};
pub use tools::{ListedTool, ToolContext, ToolRegistry, ToolSet};
pub use transcript::{RenderEvent, Transcript};

static DEBUG_FROM_CONFIG: AtomicBool = AtomicBool::new(false);

/// Verbose per-call logging, on with `QUILL_DEBUG=1` or `debug.enabled`.
pub fn debug_enabled() -> bool {
    DEBUG_FROM_CONFIG.load(Ordering::Relaxed)
        || matches!(std::env::var("QUILL_DEBUG").as_deref(), Ok("1"))
}

pub(crate) fn enable_debug_from_config() {
    DEBUG_FROM_CONFIG.store(true, Ordering::Relaxed);
}
