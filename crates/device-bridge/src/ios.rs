use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{DeviceBridgeError, DeviceResult};
use crate::installer::AppInstaller;
use crate::shell::{ExecOptions, ShellExecutor};
use crate::transfer::FileTransfer;

pub const INSTALLATION_STAGING_DIR: &str = "PublicStaging";
pub const DEFAULT_ITEM_PUSH_TIMEOUT: Duration = Duration::from_secs(30);
const IOS_CLI: &str = "ios";

/// Device service that installs a bundle already pushed to the staging area.
#[async_trait]
pub trait InstallationProxy: Send + Sync {
    async fn install_staged(&self, udid: &str, staged_path: &str) -> DeviceResult<()>;
}

/// Pushes bundles through [`FileTransfer`] and installs them from the staging
/// directory, falling back to the `ios` command line tool when that fails or
/// when no device services are configured.
pub struct IosDeployInstaller {
    shell: Arc<dyn ShellExecutor>,
    services: Option<(Arc<dyn FileTransfer>, Arc<dyn InstallationProxy>)>,
    push_timeout: Duration,
    cli: String,
}

impl IosDeployInstaller {
    pub fn new(shell: Arc<dyn ShellExecutor>) -> Self {
        Self {
            shell,
            services: None,
            push_timeout: DEFAULT_ITEM_PUSH_TIMEOUT,
            cli: IOS_CLI.to_string(),
        }
    }

    pub fn with_device_services(
        mut self,
        transfer: Arc<dyn FileTransfer>,
        proxy: Arc<dyn InstallationProxy>,
    ) -> Self {
        self.services = Some((transfer, proxy));
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn with_cli(mut self, cli: impl Into<String>) -> Self {
        self.cli = cli.into();
        self
    }

    /// Mirrors the local bundle under `PublicStaging/<bundle name>`.
    pub async fn push_app_bundle(&self, transfer: &dyn FileTransfer, app: &Path) -> DeviceResult<String> {
        let started = Instant::now();
        let bundle_name = app
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = format!("{INSTALLATION_STAGING_DIR}/{bundle_name}");
        if let Err(err) = transfer.delete_dir(&staged).await {
            debug!(%err, "no previous staged bundle to remove");
        }
        transfer.create_dir(&staged).await?;

        for entry in WalkDir::new(app).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| DeviceBridgeError::Transfer {
                remote: staged.clone(),
                message: err.to_string(),
            })?;
            let relative = entry.path().strip_prefix(app).unwrap_or(entry.path());
            let remote = remote_join(&staged, relative);
            if entry.file_type().is_dir() {
                transfer.create_dir(&remote).await?;
                continue;
            }
            match tokio::time::timeout(self.push_timeout, transfer.write_file(&remote, entry.path())).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => {
                    return Err(DeviceBridgeError::Transfer {
                        remote,
                        message: format!(
                            "Could not push '{}' within the timeout of {}ms",
                            entry.path().display(),
                            self.push_timeout.as_millis()
                        ),
                    })
                }
            }
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pushed the app files"
        );
        Ok(staged)
    }

    async fn install_with_services(&self, udid: &str, app: &Path) -> DeviceResult<()> {
        let Some((transfer, proxy)) = self.services.as_ref() else {
            return Err(DeviceBridgeError::Transfer {
                remote: INSTALLATION_STAGING_DIR.to_string(),
                message: "no device file transfer service configured".to_string(),
            });
        };
        let staged = self.push_app_bundle(transfer.as_ref(), app).await?;
        proxy.install_staged(udid, &staged).await
    }

    async fn install_with_cli(&self, udid: &str, app: &Path, first: &DeviceBridgeError) -> DeviceResult<()> {
        let app_arg = app.display().to_string();
        let args = vec![
            "install".to_string(),
            format!("--path={app_arg}"),
            format!("--udid={udid}"),
        ];
        match self.shell.exec(&self.cli, &args, &ExecOptions::default()).await {
            Ok(_) => Ok(()),
            Err(DeviceBridgeError::Spawn { .. }) => Err(DeviceBridgeError::Install {
                app: app_arg,
                cause: first.to_string(),
                detail: format!("'{}' utility has not been found in PATH. Is it installed?", self.cli),
            }),
            Err(err) => Err(DeviceBridgeError::Install {
                app: app_arg,
                cause: first.to_string(),
                detail: err.detail(),
            }),
        }
    }
}

fn remote_join(base: &str, relative: &Path) -> String {
    let mut remote = PathBuf::from(base);
    remote.push(relative);
    remote.to_string_lossy().replace('\\', "/")
}

#[async_trait]
impl AppInstaller for IosDeployInstaller {
    fn platform(&self) -> &'static str {
        "ios"
    }

    async fn install(&self, udid: &str, app: &Path) -> DeviceResult<()> {
        let started = Instant::now();
        if let Err(err) = self.install_with_services(udid, app).await {
            warn!(%err, "error installing app, falling back to '{}' usage", self.cli);
            self.install_with_cli(udid, app, &err).await?;
        }
        info!(
            udid,
            app = %app.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "app installation succeeded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ExecOutput;
    use crate::transfer::DirectoryTransfer;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingShell {
        calls: Mutex<Vec<Vec<String>>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl ShellExecutor for RecordingShell {
        async fn exec(
            &self,
            program: &str,
            args: &[String],
            _opts: &ExecOptions,
        ) -> DeviceResult<ExecOutput> {
            self.calls.lock().push(args.to_vec());
            match &self.fail_with {
                Some(stderr) => Err(DeviceBridgeError::Exec {
                    command: program.to_string(),
                    cause: "Command exited with code 1".into(),
                    output: stderr.clone(),
                }),
                None => Ok(ExecOutput::default()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingProxy(Mutex<Vec<String>>);

    #[async_trait]
    impl InstallationProxy for RecordingProxy {
        async fn install_staged(&self, _udid: &str, staged_path: &str) -> DeviceResult<()> {
            self.0.lock().push(staged_path.to_string());
            Ok(())
        }
    }

    fn bundle(root: &Path) -> PathBuf {
        let app = root.join("Demo.app");
        std::fs::create_dir_all(app.join("Frameworks")).unwrap();
        std::fs::write(app.join("Info.plist"), b"<plist/>").unwrap();
        std::fs::write(app.join("Frameworks/lib.dylib"), b"bin").unwrap();
        app
    }

    #[tokio::test]
    async fn pushes_bundle_into_staging() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let device = dir.path().join("device");
        let proxy = Arc::new(RecordingProxy::default());
        let shell = Arc::new(RecordingShell::default());
        let installer = IosDeployInstaller::new(shell.clone())
            .with_device_services(Arc::new(DirectoryTransfer::new(&device)), proxy.clone());

        installer.install("00008030-ABC", &app).await.unwrap();

        assert_eq!(proxy.0.lock().as_slice(), ["PublicStaging/Demo.app"]);
        assert!(device.join("PublicStaging/Demo.app/Frameworks/lib.dylib").exists());
        assert!(shell.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_cli_without_services() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let shell = Arc::new(RecordingShell::default());
        IosDeployInstaller::new(shell.clone())
            .install("00008030-ABC", &app)
            .await
            .unwrap();
        let calls = shell.calls.lock();
        assert_eq!(calls[0][0], "install");
        assert_eq!(calls[0][1], format!("--path={}", app.display()));
        assert_eq!(calls[0][2], "--udid=00008030-ABC");
    }

    #[tokio::test]
    async fn failed_fallback_reports_both_causes() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let shell = Arc::new(RecordingShell {
            fail_with: Some("ApplicationVerificationFailed".into()),
            ..Default::default()
        });
        let err = IosDeployInstaller::new(shell)
            .install("00008030-ABC", &app)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Could not install"));
        assert!(message.contains("no device file transfer service configured"));
        assert!(message.contains("ApplicationVerificationFailed"));
    }
}
