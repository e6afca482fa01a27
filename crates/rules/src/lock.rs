use crate::error::{Result, RulesError};
use crate::layout::lock_path;
use fs2::FileExt;
use log::debug;
use std::path::Path;
use std::time::Instant;

/// Exclusive advisory lock on one category's index; released on drop.
pub struct IndexLock {
    file: std::fs::File,
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub async fn acquire_index_lock(category_dir: &Path) -> Result<IndexLock> {
    tokio::fs::create_dir_all(category_dir).await?;
    let path = lock_path(category_dir);

    tokio::task::spawn_blocking(move || -> Result<IndexLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| RulesError::Lock(format!("open {}: {err}", path.display())))?;

        let start = Instant::now();
        file.lock_exclusive()
            .map_err(|err| RulesError::Lock(format!("acquire {}: {err}", path.display())))?;
        debug!(
            "Index lock {} acquired after {}ms",
            path.display(),
            start.elapsed().as_millis()
        );

        Ok(IndexLock { file })
    })
    .await
    .map_err(|err| RulesError::Lock(format!("join lock task: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn lock_serializes_holders() {
        let dir = tempfile::TempDir::new().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let root = dir.path().to_path_buf();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                let _lock = acquire_index_lock(&root).await.unwrap();
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(dir.path().join(crate::layout::LOCK_FILE).exists());
    }
}
