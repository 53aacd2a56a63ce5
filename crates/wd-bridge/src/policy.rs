use std::sync::Arc;
use std::time::Duration;

use mcloud_scheduler::model::DEFAULT_NEW_COMMAND_TIMEOUT;
use mcloud_scheduler::{ExecutorConfig, SecurityPolicy};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_PATH: &str = "/wd/hub";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverBridgePolicy {
    pub base_path: String,
    pub commands_queue: bool,
    pub new_command_timeout_secs: u64,
    pub security: SecurityPolicy,
}

impl Default for WebDriverBridgePolicy {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            commands_queue: true,
            new_command_timeout_secs: DEFAULT_NEW_COMMAND_TIMEOUT.as_secs(),
            security: SecurityPolicy::default(),
        }
    }
}

impl WebDriverBridgePolicy {
    /// Leading slash, no trailing slash; `/` becomes empty.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            commands_queue: self.commands_queue,
            new_command_timeout: Duration::from_secs(self.new_command_timeout_secs),
            ..ExecutorConfig::default()
        }
    }
}

/// Shared, updatable view of the bridge policy. Sessions pick up the
/// snapshot taken when they are created.
#[derive(Clone, Default)]
pub struct WebDriverBridgePolicyHandle {
    inner: Arc<RwLock<WebDriverBridgePolicy>>,
}

impl WebDriverBridgePolicyHandle {
    pub fn new(policy: WebDriverBridgePolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn snapshot(&self) -> WebDriverBridgePolicy {
        self.inner.read().clone()
    }

    pub fn update(&self, policy: WebDriverBridgePolicy) {
        *self.inner.write() = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        let mut policy = WebDriverBridgePolicy::default();
        assert_eq!(policy.normalized_base_path(), "/wd/hub");
        policy.base_path = "wd/hub/".into();
        assert_eq!(policy.normalized_base_path(), "/wd/hub");
        policy.base_path = "/".into();
        assert_eq!(policy.normalized_base_path(), "");
    }

    #[test]
    fn handle_updates_are_visible() {
        let handle = WebDriverBridgePolicyHandle::default();
        let mut policy = handle.snapshot();
        policy.new_command_timeout_secs = 5;
        handle.update(policy);
        assert_eq!(
            handle.snapshot().executor_config().new_command_timeout,
            Duration::from_secs(5)
        );
    }
}
