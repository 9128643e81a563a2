use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{normalize_path, ChildEntry, ResourceStore};
use crate::error::{CoreError, CoreResult};

/// Document store rooted at a folder on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsResourceStore {
    root: PathBuf,
}

impl FsResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> CoreResult<PathBuf> {
        let normalized = normalize_path(path)?;
        if normalized.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(normalized))
    }
}

fn map_io(path: &str, err: std::io::Error) -> CoreError {
    if err.kind() == IoErrorKind::NotFound {
        return CoreError::NotFound(format!("`{path}`"));
    }
    CoreError::io(path, err)
}

#[async_trait]
impl ResourceStore for FsResourceStore {
    async fn exists(&self, path: &str) -> CoreResult<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| CoreError::io(path, e))
    }

    async fn read(&self, path: &str) -> CoreResult<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &str) -> CoreResult<()> {
        let full = self.resolve(path)?;
        if !tokio::fs::try_exists(&full)
            .await
            .map_err(|e| CoreError::io(path, e))?
        {
            return Err(CoreError::NotFound(format!("`{path}`")));
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn create(&self, path: &str, content: &str) -> CoreResult<()> {
        use tokio::io::AsyncWriteExt;

        let full = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|e| CoreError::io(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| CoreError::io(path, e))?;
        file.flush().await.map_err(|e| CoreError::io(path, e))
    }

    async fn delete(&self, path: &str) -> CoreResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn mkdir_recursive_if_missing(&self, path: &str) -> CoreResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| CoreError::io(path, e))
    }

    async fn list_children(&self, path: &str) -> CoreResult<Vec<ChildEntry>> {
        let full = self.resolve(path)?;
        let mut read_dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| map_io(path, e))?;
        let mut children = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CoreError::io(path, e))?
        {
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    if crate::debug_enabled() {
                        tracing::debug!(error = %e, "list skip unreadable entry");
                    }
                    continue;
                }
            };
            children.push(ChildEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_container: file_type.is_dir(),
            });
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_write_read_delete_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsResourceStore::new(dir.path());
        store.mkdir_recursive_if_missing("notes").await.unwrap();
        store.create("notes/a.md", "one").await.unwrap();
        assert!(store.create("notes/a.md", "dup").await.is_err());
        store.write("notes/a.md", "two").await.unwrap();
        assert_eq!(store.read("notes/a.md").await.unwrap(), "two");
        store.delete("notes/a.md").await.unwrap();
        assert!(!store.exists("notes/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn missing_documents_map_to_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsResourceStore::new(dir.path());
        assert!(matches!(
            store.read("ghost.md").await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            store.write("ghost.md", "x").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsResourceStore::new(dir.path());
        assert!(matches!(
            store.read("../outside.md").await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_children_marks_folders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsResourceStore::new(dir.path());
        store.mkdir_recursive_if_missing("b/inner").await.unwrap();
        store.create("a.md", "").await.unwrap();
        let children = store.list_children("").await.unwrap();
        assert_eq!(
            children,
            vec![
                ChildEntry { name: "a.md".into(), is_container: false },
                ChildEntry { name: "b".into(), is_container: true },
            ]
        );
    }
}
