use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{ProvisionError, ProvisionResult};

/// `<file>.lock` sibling that peer processes use to signal an in-progress
/// download into the shared apps folder.
pub fn lock_path_for(local_file: &Path) -> PathBuf {
    let mut raw = local_file.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}

/// Cross-process lock file. Removed on [`release`](PeerLock::release) or drop,
/// so cancellation and panics do not leave it behind.
#[derive(Debug)]
pub struct PeerLock {
    path: PathBuf,
    released: bool,
}

impl PeerLock {
    pub async fn acquire(path: impl Into<PathBuf>) -> ProvisionResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ProvisionError::io("create shared folder", parent, err))?;
        }
        tokio::fs::write(&path, b"")
            .await
            .map_err(|err| ProvisionError::io("create lock file", &path, err))?;
        debug!(lock = %path.display(), "acquired peer lock");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(lock = %self.path.display(), "released peer lock"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(lock = %self.path.display(), %err, "unable to remove lock file"),
        }
    }
}

impl Drop for PeerLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(lock = %self.path.display(), %err, "unable to remove lock file");
            }
        }
    }
}

/// Polls until `lock` disappears, at most `attempts` times `interval` apart.
pub async fn wait_for_release(
    app: &str,
    lock: &Path,
    interval: Duration,
    attempts: u32,
) -> ProvisionResult<()> {
    let budget_ms = (interval * attempts).as_millis() as u64;
    info!(
        lock = %lock.display(),
        budget_ms,
        "another process is downloading this application, waiting for its lock"
    );
    for _ in 0..attempts {
        if !exists(lock).await {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
    if !exists(lock).await {
        return Ok(());
    }
    Err(ProvisionError::LockTimeout {
        app: app.to_string(),
        lock: lock.to_path_buf(),
        waited_ms: budget_ms,
    })
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/srv/apps/app.apk")),
            PathBuf::from("/srv/apps/app.apk.lock")
        );
    }

    #[tokio::test]
    async fn lock_is_removed_on_release_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/app.apk.lock");
        let lock = PeerLock::acquire(&path).await.unwrap();
        assert!(path.exists());
        lock.release().await;
        assert!(!path.exists());

        {
            let _lock = PeerLock::acquire(&path).await.unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn wait_times_out_with_budget_in_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.apk.lock");
        std::fs::write(&path, b"").unwrap();
        let err = wait_for_release("https://h/app.apk", &path, Duration::from_millis(10), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::LockTimeout { waited_ms: 30, .. }));
        assert!(err.to_string().contains("30ms"));
    }

    #[tokio::test]
    async fn wait_returns_once_peer_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.apk.lock");
        std::fs::write(&path, b"").unwrap();
        let remover = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::fs::remove_file(remover).unwrap();
        });
        wait_for_release("app", &path, Duration::from_millis(10), 50)
            .await
            .unwrap();
    }
}
