//! Pre-mutation capture and best-effort restore of single documents.
//!
//! Each snapshot is one JSON record `<dir>/<id>.json` in the record store.
//! Ids are random v4 UUIDs, so concurrent captures never contend.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::resource::{self, join_path, ResourceStore};

/// Version written into every record.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = ".json";

/// What a document looked like before the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PriorState {
    Content { content: String },
    /// The document did not exist; restoring deletes it.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub id: String,
    pub resource_path: String,
    pub created_at: DateTime<Utc>,
    pub prior: PriorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Prior content written back (document overwritten or recreated).
    Restored,
    /// Prior state was absent and the document was deleted.
    Deleted,
    /// Prior state was absent and the document still does not exist.
    AlreadyAbsent,
    /// No record for the id; nothing was touched.
    SnapshotMissing,
}

pub struct SnapshotStore {
    documents: Arc<dyn ResourceStore>,
    records: Arc<dyn ResourceStore>,
    dir: String,
}

impl SnapshotStore {
    /// `documents` is what gets captured and restored; `records` holds the
    /// snapshot files under `dir`. Both may be the same store.
    pub fn new(
        documents: Arc<dyn ResourceStore>,
        records: Arc<dyn ResourceStore>,
        dir: &str,
    ) -> CoreResult<Self> {
        Ok(Self {
            documents,
            records,
            dir: resource::normalize_path(dir)?,
        })
    }

    /// Whether `path` (normalized) falls inside the snapshot records.
    pub fn holds(&self, path: &str) -> bool {
        if self.dir.is_empty() {
            return path
                .strip_suffix(RECORD_EXTENSION)
                .is_some_and(|id| Uuid::parse_str(id).is_ok());
        }
        path == self.dir
            || path
                .strip_prefix(self.dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn record_path(&self, id: &str) -> String {
        join_path(&self.dir, &format!("{id}{RECORD_EXTENSION}"))
    }

    /// Capture the current state of `path` and return the new snapshot id.
    ///
    /// Must complete before the guarded mutation starts.
    pub async fn create_snapshot(&self, path: &str) -> CoreResult<String> {
        let path = resource::normalize_resource_path(path)?;
        let prior = if self.documents.exists(&path).await? {
            PriorState::Content {
                content: self.documents.read(&path).await?,
            }
        } else {
            PriorState::Absent
        };
        let id = Uuid::new_v4().simple().to_string();
        let snapshot = Snapshot {
            version: SNAPSHOT_FORMAT_VERSION,
            id: id.clone(),
            resource_path: path.clone(),
            created_at: Utc::now(),
            prior,
        };
        let encoded = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CoreError::io(self.record_path(&id), e))?;
        self.records.mkdir_recursive_if_missing(&self.dir).await?;
        self.records.create(&self.record_path(&id), &encoded).await?;
        tracing::info!(
            snapshot_id = %id,
            path = %path,
            absent = matches!(snapshot.prior, PriorState::Absent),
            "snapshot created"
        );
        Ok(id)
    }

    pub async fn load(&self, id: &str) -> CoreResult<Option<Snapshot>> {
        if Uuid::parse_str(id).is_err() {
            return Ok(None);
        }
        let record_path = self.record_path(id);
        if !self.records.exists(&record_path).await? {
            return Ok(None);
        }
        let raw = self.records.read(&record_path).await?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Validation(format!("corrupt snapshot `{id}`: {e}")))?;
        if snapshot.version > SNAPSHOT_FORMAT_VERSION {
            return Err(CoreError::Validation(format!(
                "snapshot `{id}` has unsupported format version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Put `path` back the way snapshot `id` saw it.
    ///
    /// A missing snapshot is logged and reported, never an error.
    pub async fn restore_snapshot(&self, id: &str, path: &str) -> CoreResult<RestoreOutcome> {
        let path = resource::normalize_resource_path(path)?;
        let Some(snapshot) = self.load(id).await? else {
            tracing::warn!(snapshot_id = %id, path = %path, "snapshot missing; restore skipped");
            return Ok(RestoreOutcome::SnapshotMissing);
        };
        if snapshot.resource_path != path {
            tracing::warn!(
                snapshot_id = %id,
                recorded = %snapshot.resource_path,
                requested = %path,
                "restoring snapshot onto a different path"
            );
        }
        let outcome = match snapshot.prior {
            PriorState::Absent => {
                if self.documents.exists(&path).await? {
                    self.documents.delete(&path).await?;
                    RestoreOutcome::Deleted
                } else {
                    RestoreOutcome::AlreadyAbsent
                }
            }
            PriorState::Content { content } => {
                resource::put(self.documents.as_ref(), &path, &content).await?;
                RestoreOutcome::Restored
            }
        };
        tracing::info!(snapshot_id = %id, path = %path, ?outcome, "snapshot restored");
        Ok(outcome)
    }

    /// Remove a stored snapshot. Deleting an unknown id is fine.
    pub async fn delete_snapshot(&self, id: &str) -> CoreResult<()> {
        if Uuid::parse_str(id).is_err() {
            return Ok(());
        }
        let record_path = self.record_path(id);
        if !self.records.exists(&record_path).await? {
            return Ok(());
        }
        match self.records.delete(&record_path).await {
            Ok(()) | Err(CoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn list_ids(&self) -> CoreResult<Vec<String>> {
        if !self.dir.is_empty() && !self.records.exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let children = self.records.list_children(&self.dir).await?;
        Ok(children
            .into_iter()
            .filter(|child| !child.is_container)
            .filter_map(|child| {
                child
                    .name
                    .strip_suffix(RECORD_EXTENSION)
                    .filter(|id| Uuid::parse_str(id).is_ok())
                    .map(str::to_string)
            })
            .collect())
    }

    /// Delete every stored snapshot whose id is not in `keep`.
    pub async fn prune(&self, keep: &HashSet<String>) -> CoreResult<usize> {
        let mut removed = 0usize;
        for id in self.list_ids().await? {
            if keep.contains(&id) {
                continue;
            }
            self.delete_snapshot(&id).await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, kept = keep.len(), "pruned snapshots");
        }
        Ok(removed)
    }
}
