use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{DeviceBridgeError, DeviceResult};
use crate::installer::AppInstaller;
use crate::shell::{ExecOptions, ShellExecutor};

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AdbInstaller {
    shell: Arc<dyn ShellExecutor>,
    adb_path: String,
    install_timeout: Duration,
}

impl AdbInstaller {
    pub fn new(shell: Arc<dyn ShellExecutor>) -> Self {
        Self {
            shell,
            adb_path: "adb".to_string(),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    pub fn with_adb_path(mut self, path: impl Into<String>) -> Self {
        self.adb_path = path.into();
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Runs `adb -s <udid> <args...>` and returns stdout.
    pub async fn exec(&self, udid: &str, args: &[&str], opts: &ExecOptions) -> DeviceResult<String> {
        let mut full = vec!["-s".to_string(), udid.to_string()];
        full.extend(args.iter().map(|arg| arg.to_string()));
        let output = self.shell.exec(&self.adb_path, &full, opts).await?;
        Ok(output.stdout)
    }

    /// Restarts the adb server; no other adb command runs meanwhile.
    pub async fn kill_server(&self) -> DeviceResult<()> {
        self.shell
            .exec(&self.adb_path, &["kill-server".to_string()], &ExecOptions::exclusive())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AppInstaller for AdbInstaller {
    fn platform(&self) -> &'static str {
        "android"
    }

    async fn install(&self, udid: &str, app: &Path) -> DeviceResult<()> {
        let app_arg = app.display().to_string();
        let opts = ExecOptions::default().with_timeout(self.install_timeout);
        let stdout = self
            .exec(udid, &["install", "-r", &app_arg], &opts)
            .await
            .map_err(|err| DeviceBridgeError::Install {
                app: app_arg.clone(),
                cause: err.to_string(),
                detail: err.detail(),
            })?;
        // adb reports some install failures with a zero exit code.
        if let Some(line) = stdout.lines().find(|line| line.contains("Failure")) {
            return Err(DeviceBridgeError::Install {
                app: app_arg,
                cause: "adb rejected the package".to_string(),
                detail: line.trim().to_string(),
            });
        }
        info!(udid, app = %app_arg, "installed application through adb");
        Ok(())
    }
}
