//! mcloud-driver: a WebDriver-compatible device automation server.
//!
//! Exposes the CLI, configuration and composition root for integration tests.

pub mod cli;
pub mod config;
pub mod server;

pub use config::{load_config, DriverConfig};
pub use server::{DriverServer, ExitCleanup};
