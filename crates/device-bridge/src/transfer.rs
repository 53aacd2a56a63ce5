use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DeviceBridgeError, DeviceResult};

/// Device-side file operations keyed by a path relative to the device's
/// media root.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn create_dir(&self, remote: &str) -> DeviceResult<()>;

    /// Streams the local file into `remote`. Returns bytes written.
    async fn write_file(&self, remote: &str, local: &Path) -> DeviceResult<u64>;

    async fn delete_dir(&self, remote: &str) -> DeviceResult<()>;
}

/// [`FileTransfer`] over a directory, such as a device share mounted on the
/// host.
pub struct DirectoryTransfer {
    root: PathBuf,
}

impl DirectoryTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote: &str) -> DeviceResult<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(remote).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir | Component::RootDir => {}
                _ => {
                    return Err(DeviceBridgeError::Transfer {
                        remote: remote.to_string(),
                        message: "path escapes the transfer root".to_string(),
                    })
                }
            }
        }
        Ok(path)
    }
}

fn transfer_error(remote: &str, err: std::io::Error) -> DeviceBridgeError {
    DeviceBridgeError::Transfer {
        remote: remote.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl FileTransfer for DirectoryTransfer {
    async fn create_dir(&self, remote: &str) -> DeviceResult<()> {
        let path = self.resolve(remote)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|err| transfer_error(remote, err))
    }

    async fn write_file(&self, remote: &str, local: &Path) -> DeviceResult<u64> {
        let path = self.resolve(remote)?;
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|err| transfer_error(remote, err))?;
        let mut target = tokio::fs::File::create(&path)
            .await
            .map_err(|err| transfer_error(remote, err))?;
        let written = tokio::io::copy(&mut source, &mut target)
            .await
            .map_err(|err| transfer_error(remote, err))?;
        debug!(remote, bytes = written, "pushed file");
        Ok(written)
    }

    async fn delete_dir(&self, remote: &str) -> DeviceResult<()> {
        let path = self.resolve(remote)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(transfer_error(remote, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_inside_root_only() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.bin");
        std::fs::write(&local, b"payload").unwrap();
        let transfer = DirectoryTransfer::new(dir.path().join("device"));

        transfer.create_dir("PublicStaging/App.app").await.unwrap();
        let written = transfer
            .write_file("PublicStaging/App.app/Info.plist", &local)
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert!(transfer.write_file("../escape", &local).await.is_err());

        transfer.delete_dir("PublicStaging/App.app").await.unwrap();
        transfer.delete_dir("PublicStaging/App.app").await.unwrap();
        assert!(!dir.path().join("device/PublicStaging/App.app").exists());
    }
}
