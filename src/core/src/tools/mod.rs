//! Tools the agent may call, and the plans they hand to the pipeline.
//!
//! A tool never touches the document store for a side effect itself. It
//! validates its arguments and returns a [`ToolPlan`]; the pipeline decides
//! whether a gate, a snapshot and a lock are needed before anything runs.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::CoreResult;
use crate::quill_config::{ArtifactsConfig, WebSearchConfig};
use crate::resource::ResourceStore;

mod args;
mod artifact;
mod documents;
mod params;
mod question;
mod registry;
mod web;

pub use args::ParsedToolArgs;
pub use params::{ToolParameters, ToolParametersBuilder};
pub use registry::{ListedTool, ToolProvider, ToolRegistry, ToolSet};

pub const READ_DOCUMENT_TOOL: &str = "read_document";
pub const LIST_DOCUMENTS_TOOL: &str = "list_documents";
pub const SEARCH_DOCUMENTS_TOOL: &str = "search_documents";
pub const WRITE_DOCUMENT_TOOL: &str = "write_document";
pub const CREATE_ARTIFACT_TOOL: &str = "create_artifact";
pub const ASK_USER_TOOL: &str = "ask_user";
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// Everything a tool may capture when it is built.
#[derive(Clone)]
pub struct ToolContext {
    pub documents: Arc<dyn ResourceStore>,
    pub artifacts: ArtifactsConfig,
    pub web: WebSearchConfig,
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> &ToolParameters;

    /// Validate `args` and describe the work. Errors here never reach a gate.
    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan>;
}

pub enum ToolPlan {
    /// Side-effect free; runs as soon as it is planned.
    Query(QueryPlan),
    /// Replaces one document; previewed, gated and snapshotted.
    Mutation(MutationPlan),
    /// Suspends on the user's answer.
    Question(QuestionPlan),
}

pub struct QueryPlan {
    pub summary: String,
    pub run: BoxFuture<'static, CoreResult<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPlan {
    /// Normalized store path.
    pub path: String,
    pub content: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPlan {
    pub question: String,
    pub options: Vec<String>,
}

pub(crate) fn debug_tools_enabled() -> bool {
    crate::debug_enabled()
}
