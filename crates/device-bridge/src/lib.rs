pub mod adb;
pub mod error;
pub mod installer;
pub mod ios;
pub mod shell;
pub mod transfer;

pub use adb::AdbInstaller;
pub use error::{DeviceBridgeError, DeviceResult};
pub use installer::AppInstaller;
pub use ios::{InstallationProxy, IosDeployInstaller};
pub use shell::{ExecOptions, ExecOutput, ProcessShell, ShellExecutor};
pub use transfer::{DirectoryTransfer, FileTransfer};
