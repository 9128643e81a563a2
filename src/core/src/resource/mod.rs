mod fs;
mod memory;

pub use fs::FsResourceStore;
pub use memory::{MemoryResourceStore, StoreOp};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};

/// One child of a container as reported by [`ResourceStore::list_children`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildEntry {
    pub name: String,
    pub is_container: bool,
}

/// Abstract document store.
///
/// Paths are store-relative, `/`-separated, already normalized with
/// [`normalize_path`]. Implementations give last-writer-wins and
/// read-after-write consistency for a single path; nothing more is assumed.
/// The core never retries a failed call.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> CoreResult<bool>;

    async fn read(&self, path: &str) -> CoreResult<String>;

    /// Overwrite an existing resource.
    async fn write(&self, path: &str, content: &str) -> CoreResult<()>;

    /// Create a resource whose containing folder already exists.
    async fn create(&self, path: &str, content: &str) -> CoreResult<()>;

    async fn delete(&self, path: &str) -> CoreResult<()>;

    async fn mkdir_recursive_if_missing(&self, path: &str) -> CoreResult<()>;

    async fn list_children(&self, path: &str) -> CoreResult<Vec<ChildEntry>>;
}

/// Write `content` to `path`, creating it (and its folders) when missing.
pub async fn put(store: &dyn ResourceStore, path: &str, content: &str) -> CoreResult<()> {
    if store.exists(path).await? {
        return store.write(path, content).await;
    }
    if let Some(parent) = parent_of(path) {
        store.mkdir_recursive_if_missing(parent).await?;
    }
    store.create(path, content).await
}

/// Normalize a store-relative path.
///
/// Strips leading `./` and `/`, collapses duplicate separators and rejects
/// `..` components. The empty string names the store root.
pub fn normalize_path(raw: &str) -> CoreResult<String> {
    let unified = raw.trim().replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(CoreError::Validation(format!(
                    "path `{raw}` escapes the document store"
                )))
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Like [`normalize_path`] but the result must name a resource, not the root.
pub fn normalize_resource_path(raw: &str) -> CoreResult<String> {
    let path = normalize_path(raw)?;
    if path.is_empty() {
        return Err(CoreError::Validation("path must not be empty".into()));
    }
    Ok(path)
}

pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
