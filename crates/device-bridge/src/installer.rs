use std::path::Path;

use async_trait::async_trait;

use crate::error::DeviceResult;

/// Installs a provisioned application onto a device.
#[async_trait]
pub trait AppInstaller: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn install(&self, udid: &str, app: &Path) -> DeviceResult<()>;
}
