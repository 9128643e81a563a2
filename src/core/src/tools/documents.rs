use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::resource::{self, join_path, ResourceStore};

use super::{
    MutationPlan, ParsedToolArgs, QueryPlan, Tool, ToolContext, ToolParameters, ToolPlan,
    LIST_DOCUMENTS_TOOL, READ_DOCUMENT_TOOL, SEARCH_DOCUMENTS_TOOL, WRITE_DOCUMENT_TOOL,
};

const DEFAULT_READ_LIMIT: usize = 2000;
const DEFAULT_LIST_LIMIT: usize = 200;
const DEFAULT_LIST_DEPTH: usize = 2;
const DEFAULT_SEARCH_LIMIT: usize = 100;
const MAX_SEARCH_LIMIT: usize = 1000;
const MAX_SEARCH_FILES: usize = 2000;

struct ReadDocumentTool {
    ctx: ToolContext,
    params: ToolParameters,
}

struct ListDocumentsTool {
    ctx: ToolContext,
    params: ToolParameters,
}

struct SearchDocumentsTool {
    ctx: ToolContext,
    params: ToolParameters,
}

struct WriteDocumentTool {
    params: ToolParameters,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

pub fn read_tool(ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("path", "Document path inside the store", true)
        .number("offset", "1-indexed line offset", false)
        .number("limit", "Max lines to return", false)
        .build();
    Arc::new(ReadDocumentTool { ctx, params })
}

pub fn list_tool(ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("path", "Folder to list (defaults to the store root)", false)
        .number("depth", "Depth to traverse", false)
        .number("limit", "Max entries", false)
        .build();
    Arc::new(ListDocumentsTool { ctx, params })
}

pub fn search_tool(ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("query", "Text to look for (case-insensitive)", true)
        .string("path", "Folder to search (defaults to the store root)", false)
        .number("limit", "Max matching lines", false)
        .build();
    Arc::new(SearchDocumentsTool { ctx, params })
}

pub fn write_tool(_ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("path", "Document path inside the store", true)
        .string("content", "Full new content of the document", true)
        .build();
    Arc::new(WriteDocumentTool { params })
}

impl Tool for ReadDocumentTool {
    fn name(&self) -> &str {
        READ_DOCUMENT_TOOL
    }

    fn description(&self) -> &str {
        "Read a document, returning numbered lines"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let path = resource::normalize_resource_path(&args.require_string("path")?)?;
        let offset = args.get_usize("offset")?.unwrap_or(1).max(1);
        let limit = args.get_usize("limit")?.unwrap_or(DEFAULT_READ_LIMIT).max(1);
        let store = self.ctx.documents.clone();
        let summary = format!("Reading {path}");
        Ok(ToolPlan::Query(QueryPlan {
            summary,
            run: async move { read_impl(store.as_ref(), &path, offset, limit).await }.boxed(),
        }))
    }
}

async fn read_impl(
    store: &dyn ResourceStore,
    path: &str,
    offset: usize,
    limit: usize,
) -> CoreResult<Value> {
    if super::debug_tools_enabled() {
        tracing::debug!(path, offset, limit, "read_document invoked");
    }
    if !store.exists(path).await? {
        return Err(CoreError::NotFound(format!("document `{path}`")));
    }
    let content = store.read(path).await?;
    let total_lines = content.lines().count();
    if offset > 1 && offset > total_lines {
        return Err(CoreError::Validation(format!(
            "offset {offset} exceeds document length ({total_lines} lines)"
        )));
    }
    let output: Vec<String> = content
        .lines()
        .enumerate()
        .skip(offset - 1)
        .take(limit)
        .map(|(index, line)| format!("L{}: {}", index + 1, line))
        .collect();
    Ok(json!({
        "path": path,
        "offset": offset,
        "limit": limit,
        "total_lines": total_lines,
        "content": output.join("\n"),
    }))
}

impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        LIST_DOCUMENTS_TOOL
    }

    fn description(&self) -> &str {
        "List documents and folders breadth-first"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let base = resource::normalize_path(&args.get_string("path")?.unwrap_or_default())?;
        let depth = args.get_usize("depth")?.unwrap_or(DEFAULT_LIST_DEPTH).max(1);
        let limit = args.get_usize("limit")?.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
        let store = self.ctx.documents.clone();
        let summary = if base.is_empty() {
            "Listing documents".to_string()
        } else {
            format!("Listing {base}")
        };
        Ok(ToolPlan::Query(QueryPlan {
            summary,
            run: async move {
                if super::debug_tools_enabled() {
                    tracing::debug!(path = %base, depth, limit, "list_documents invoked");
                }
                let entries = list_tree(store.as_ref(), &base, depth, limit).await?;
                Ok(json!({ "path": base, "entries": entries }))
            }
            .boxed(),
        }))
    }
}

async fn list_tree(
    store: &dyn ResourceStore,
    base: &str,
    depth: usize,
    limit: usize,
) -> CoreResult<Vec<Value>> {
    if !base.is_empty() && !store.exists(base).await? {
        return Err(CoreError::NotFound(format!("folder `{base}`")));
    }
    let mut results = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((base.to_string(), 0usize));

    while let Some((dir, level)) = queue.pop_front() {
        if results.len() >= limit {
            break;
        }
        let children = match store.list_children(&dir).await {
            Ok(children) => children,
            Err(err) => {
                if super::debug_tools_enabled() {
                    tracing::debug!(path = %dir, error = %err, "list skip unreadable folder");
                }
                continue;
            }
        };
        for child in children {
            if results.len() >= limit {
                break;
            }
            if child.name.starts_with('.') {
                continue;
            }
            let path = join_path(&dir, &child.name);
            let kind = if child.is_container { "dir" } else { "file" };
            results.push(json!({ "path": path, "type": kind }));
            if child.is_container && level + 1 < depth {
                queue.push_back((path, level + 1));
            }
        }
    }
    Ok(results)
}

impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        SEARCH_DOCUMENTS_TOOL
    }

    fn description(&self) -> &str {
        "Search document contents for a phrase"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let query = args.require_string("query")?;
        let base = resource::normalize_path(&args.get_string("path")?.unwrap_or_default())?;
        let limit = args
            .get_usize("limit")?
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        let store = self.ctx.documents.clone();
        let summary = format!("Searching for \"{}\"", query.trim());
        Ok(ToolPlan::Query(QueryPlan {
            summary,
            run: async move { search_impl(store.as_ref(), &base, query.trim(), limit).await }
                .boxed(),
        }))
    }
}

async fn search_impl(
    store: &dyn ResourceStore,
    base: &str,
    query: &str,
    limit: usize,
) -> CoreResult<Value> {
    if super::debug_tools_enabled() {
        tracing::debug!(query, path = %base, limit, "search_documents invoked");
    }
    let needle = query.to_lowercase();
    let files = list_tree(store, base, usize::MAX, MAX_SEARCH_FILES).await?;
    let mut matches = Vec::new();
    'files: for entry in files {
        if entry["type"] != "file" {
            continue;
        }
        let Some(path) = entry["path"].as_str() else {
            continue;
        };
        let content = match store.read(path).await {
            Ok(content) => content,
            Err(err) => {
                if super::debug_tools_enabled() {
                    tracing::debug!(path, error = %err, "search skip unreadable document");
                }
                continue;
            }
        };
        for (index, line) in content.lines().enumerate() {
            if !line.to_lowercase().contains(&needle) {
                continue;
            }
            matches.push(json!({ "path": path, "line": index + 1, "text": line }));
            if matches.len() >= limit {
                break 'files;
            }
        }
    }
    Ok(json!({ "query": query, "path": base, "matches": matches }))
}

impl Tool for WriteDocumentTool {
    fn name(&self) -> &str {
        WRITE_DOCUMENT_TOOL
    }

    fn description(&self) -> &str {
        "Create or overwrite a document. The user reviews the change first."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let parsed: WriteArgs = args.deserialize()?;
        if parsed.path.trim().is_empty() {
            return Err(CoreError::Validation("path required".into()));
        }
        let path = resource::normalize_resource_path(&parsed.path)?;
        let summary = format!("Write {path}");
        Ok(ToolPlan::Mutation(MutationPlan {
            path,
            content: parsed.content,
            summary,
        }))
    }
}
