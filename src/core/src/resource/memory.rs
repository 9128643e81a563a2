use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{parent_of, ChildEntry, ResourceStore};
use crate::error::{CoreError, CoreResult};

/// A mutation observed by [`MemoryResourceStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Write(String),
    Create(String),
    Delete(String),
    Mkdir(String),
}

impl StoreOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Write(path) | Self::Create(path) | Self::Delete(path) | Self::Mkdir(path) => {
                path
            }
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Mkdir(_))
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    ops: Vec<StoreOp>,
    failing_paths: HashSet<String>,
}

impl MemoryState {
    fn dir_exists(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn check_failure(&self, path: &str) -> CoreResult<()> {
        if self.failing_paths.contains(path) {
            return Err(CoreError::io(path, "injected failure"));
        }
        Ok(())
    }
}

/// In-memory document store with implicit folders and an operation log.
#[derive(Default)]
pub struct MemoryResourceStore {
    state: Mutex<MemoryState>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document (and its folders) without recording an operation.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            let mut parent = parent_of(path);
            while let Some(dir) = parent {
                state.dirs.insert(dir.to_string());
                parent = parent_of(dir);
            }
            state.files.insert(path.to_string(), content.to_string());
        }
        self
    }

    /// Make every mutating call on `path` fail with an I/O error.
    pub fn fail_on(&self, path: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_paths.insert(path.to_string());
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.state
            .lock()
            .map(|state| state.ops.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the current documents, for assertions.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .map(|state| state.files.clone())
            .unwrap_or_default()
    }

    fn lock(&self, path: &str) -> CoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| CoreError::io(path, format!("lock: {e}")))
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn exists(&self, path: &str) -> CoreResult<bool> {
        let state = self.lock(path)?;
        Ok(state.files.contains_key(path) || (!path.is_empty() && state.dirs.contains(path)))
    }

    async fn read(&self, path: &str) -> CoreResult<String> {
        let state = self.lock(path)?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("document `{path}`")))
    }

    async fn write(&self, path: &str, content: &str) -> CoreResult<()> {
        let mut state = self.lock(path)?;
        state.check_failure(path)?;
        let Some(existing) = state.files.get_mut(path) else {
            return Err(CoreError::NotFound(format!("document `{path}`")));
        };
        *existing = content.to_string();
        state.ops.push(StoreOp::Write(path.to_string()));
        Ok(())
    }

    async fn create(&self, path: &str, content: &str) -> CoreResult<()> {
        let mut state = self.lock(path)?;
        state.check_failure(path)?;
        if state.files.contains_key(path) || state.dirs.contains(path) {
            return Err(CoreError::io(path, "already exists"));
        }
        if !state.dir_exists(parent_of(path).unwrap_or("")) {
            return Err(CoreError::io(path, "containing folder does not exist"));
        }
        state.files.insert(path.to_string(), content.to_string());
        state.ops.push(StoreOp::Create(path.to_string()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> CoreResult<()> {
        let mut state = self.lock(path)?;
        state.check_failure(path)?;
        if state.files.remove(path).is_none() {
            return Err(CoreError::NotFound(format!("document `{path}`")));
        }
        state.ops.push(StoreOp::Delete(path.to_string()));
        Ok(())
    }

    async fn mkdir_recursive_if_missing(&self, path: &str) -> CoreResult<()> {
        let mut state = self.lock(path)?;
        if state.files.contains_key(path) {
            return Err(CoreError::io(path, "a document occupies this path"));
        }
        let mut current = Some(path);
        while let Some(dir) = current {
            if !dir.is_empty() && state.dirs.insert(dir.to_string()) {
                state.ops.push(StoreOp::Mkdir(dir.to_string()));
            }
            current = parent_of(dir);
        }
        Ok(())
    }

    async fn list_children(&self, path: &str) -> CoreResult<Vec<ChildEntry>> {
        let state = self.lock(path)?;
        if !state.dir_exists(path) {
            return Err(CoreError::NotFound(format!("folder `{path}`")));
        }
        let mut children = Vec::new();
        for dir in &state.dirs {
            if parent_of(dir).unwrap_or("") == path {
                children.push(ChildEntry {
                    name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
                    is_container: true,
                });
            }
        }
        for file in state.files.keys() {
            if parent_of(file).unwrap_or("") == path {
                children.push(ChildEntry {
                    name: file.rsplit('/').next().unwrap_or(file).to_string(),
                    is_container: false,
                });
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_requires_parent_folder() {
        let store = MemoryResourceStore::new();
        let err = store.create("a/b.md", "x").await.unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
        store.mkdir_recursive_if_missing("a").await.unwrap();
        store.create("a/b.md", "x").await.unwrap();
        assert_eq!(store.read("a/b.md").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn write_of_missing_document_is_not_found() {
        let store = MemoryResourceStore::new();
        let err = store.write("nope.md", "x").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn ops_record_mutations_in_order() {
        let store = MemoryResourceStore::new().with_file("a.md", "1");
        store.write("a.md", "2").await.unwrap();
        store.mkdir_recursive_if_missing("x/y").await.unwrap();
        store.create("x/y/z.md", "3").await.unwrap();
        store.delete("a.md").await.unwrap();
        assert_eq!(
            store.ops(),
            vec![
                StoreOp::Write("a.md".into()),
                StoreOp::Mkdir("x/y".into()),
                StoreOp::Mkdir("x".into()),
                StoreOp::Create("x/y/z.md".into()),
                StoreOp::Delete("a.md".into()),
            ]
        );
    }

    #[tokio::test]
    async fn list_children_reports_folders_and_documents() {
        let store = MemoryResourceStore::new()
            .with_file("notes/a.md", "")
            .with_file("notes/sub/b.md", "")
            .with_file("root.md", "");
        let root = store.list_children("").await.unwrap();
        assert_eq!(
            root,
            vec![
                ChildEntry { name: "notes".into(), is_container: true },
                ChildEntry { name: "root.md".into(), is_container: false },
            ]
        );
        let notes = store.list_children("notes").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().any(|c| c.name == "sub" && c.is_container));
    }

    #[tokio::test]
    async fn injected_failure_blocks_mutation() {
        let store = MemoryResourceStore::new().with_file("a.md", "1");
        store.fail_on("a.md");
        assert!(store.write("a.md", "2").await.is_err());
        assert_eq!(store.read("a.md").await.unwrap(), "1");
        assert!(store.ops().is_empty());
    }
}
