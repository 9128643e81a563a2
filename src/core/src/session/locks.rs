use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-path async locks serializing snapshot-then-mutate across pipelines.
#[derive(Default)]
pub(crate) struct PathLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(path.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_path_is_serialized() {
        let locks = Arc::new(PathLocks::new());
        let first = locks.lock("a.md").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("a.md").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.lock("a.md").await;
        let _b = locks.lock("b.md").await;
    }
}
