//! Composition root: wires the application cache, the provisioner, the device
//! installers and the WebDriver bridge into one router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use mcloud_app_cache::{AppProvisioner, ApplicationCache, HttpFetcher};
use mcloud_device_bridge::{AdbInstaller, IosDeployInstaller, ProcessShell};
use mcloud_wd_bridge::{SessionStore, WebDriverBridge, WebDriverBridgePolicyHandle};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::DriverConfig;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SHELL_TIMEOUT: Duration = Duration::from_secs(20);

pub struct DriverServer {
    pub router: Router,
    pub policy: WebDriverBridgePolicyHandle,
    pub sessions: Arc<SessionStore>,
    pub cache: Arc<ApplicationCache>,
    sweeper: Option<JoinHandle<()>>,
}

impl DriverServer {
    /// Must run inside a tokio runtime; the cache sweeper is spawned here.
    pub fn compose(config: &DriverConfig) -> Self {
        let cache = Arc::new(ApplicationCache::new(config.cache_config()));
        let fetcher = Arc::new(HttpFetcher::new(config.head_timeout(), config.download_timeout()));
        let provisioner = Arc::new(AppProvisioner::new(
            cache.clone(),
            fetcher,
            config.provisioner_config(),
        ));
        let shell = Arc::new(ProcessShell::new(SHELL_TIMEOUT));
        let policy = WebDriverBridgePolicyHandle::new(config.bridge_policy());

        let bridge = WebDriverBridge::new(policy.clone())
            .with_provisioner(provisioner)
            .with_installer(Arc::new(AdbInstaller::new(shell.clone())))
            .with_installer(Arc::new(IosDeployInstaller::new(shell)));
        let sessions = bridge.sessions();
        let router = bridge.build();
        let sweeper = cache.spawn_sweeper(SWEEP_INTERVAL);

        info!(
            base_path = %policy.snapshot().normalized_base_path(),
            shared_apps_dir = ?config.provision.shared_apps_dir,
            "driver composed"
        );
        Self {
            router,
            policy,
            sessions,
            cache,
            sweeper: Some(sweeper),
        }
    }

    /// Tears every live session down, then disposes the application cache.
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let executors = self.sessions.drain();
        info!(sessions = executors.len(), "closing live sessions");
        for executor in executors {
            executor
                .start_unexpected_shutdown("The server is shutting down")
                .await;
        }
        self.cache.dispose().await;
    }

    pub fn exit_cleanup(&self) -> ExitCleanup {
        ExitCleanup {
            cache: self.cache.clone(),
        }
    }
}

impl Drop for DriverServer {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Removes cached application files when dropped, whatever path the process
/// leaves by.
pub struct ExitCleanup {
    cache: Arc<ApplicationCache>,
}

impl Drop for ExitCleanup {
    fn drop(&mut self) {
        self.cache.purge_blocking();
    }
}
