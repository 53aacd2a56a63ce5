//! Driver configuration.
//!
//! Sources are layered: built-in defaults, an optional YAML/TOML file, then
//! `MCLOUD_`-prefixed environment variables (`MCLOUD_SERVER__PORT=4723`).
//! The provisioning variables `APPIUM_APPS_DIR` and
//! `APPIUM_APP_WAITING_TIMEOUT` are honoured under their own names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use mcloud_app_cache::{CacheConfig, ProvisionerConfig};
use mcloud_scheduler::SecurityPolicy;
use mcloud_wd_bridge::policy::DEFAULT_BASE_PATH;
use mcloud_wd_bridge::WebDriverBridgePolicy;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_PREFIX: &str = "MCLOUD";
pub const APPS_DIR_ENV: &str = "APPIUM_APPS_DIR";
pub const APP_WAITING_TIMEOUT_ENV: &str = "APPIUM_APP_WAITING_TIMEOUT";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub server: ServerSection,
    pub session: SessionSection,
    pub cache: CacheSection,
    pub provision: ProvisionSection,
    pub security: SecurityPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4723,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub new_command_timeout_secs: u64,
    pub commands_queue: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            new_command_timeout_secs: 60,
            commands_queue: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_age_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_age_secs: 24 * 60 * 60,
            max_entries: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSection {
    pub head_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub lock_poll_attempts: u32,
    pub work_dir: Option<PathBuf>,
    pub shared_apps_dir: Option<PathBuf>,
}

impl Default for ProvisionSection {
    fn default() -> Self {
        Self {
            head_timeout_ms: 5_000,
            download_timeout_ms: 120_000,
            lock_poll_interval_ms: 1_000,
            lock_poll_attempts: 60,
            work_dir: None,
            shared_apps_dir: None,
        }
    }
}

impl DriverConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn bridge_policy(&self) -> WebDriverBridgePolicy {
        WebDriverBridgePolicy {
            base_path: self.server.base_path.clone(),
            commands_queue: self.session.commands_queue,
            new_command_timeout_secs: self.session.new_command_timeout_secs,
            security: self.security.clone(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_age: Duration::from_secs(self.cache.max_age_secs),
            max_entries: self.cache.max_entries,
        }
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        let defaults = ProvisionerConfig::default();
        ProvisionerConfig {
            work_dir: self.provision.work_dir.clone().unwrap_or(defaults.work_dir),
            shared_apps_dir: self.provision.shared_apps_dir.clone(),
            lock_poll_interval: Duration::from_millis(self.provision.lock_poll_interval_ms),
            lock_poll_attempts: self.provision.lock_poll_attempts,
        }
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_millis(self.provision.head_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.provision.download_timeout_ms)
    }

    /// Applies the provisioning variables. An empty apps dir leaves shared
    /// reuse disabled; an unparsable attempt count is ignored.
    pub fn apply_provisioning_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(APPS_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            self.provision.shared_apps_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(raw) = lookup(APP_WAITING_TIMEOUT_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(attempts) => self.provision.lock_poll_attempts = attempts,
                Err(err) => warn!(value = %raw, %err, "ignoring {APP_WAITING_TIMEOUT_ENV}"),
            }
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<DriverConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("security.allow_insecure")
                .with_list_parse_key("security.deny_insecure"),
        )
        .build()
        .context("Failed to assemble configuration sources")?;

    let mut config: DriverConfig = settings
        .try_deserialize()
        .context("Failed to parse driver configuration")?;
    config.apply_provisioning_env(|name| std::env::var(name).ok());
    Ok(config)
}
