use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::init_logging;
use crate::config::load_config;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();
    init_logging(&cli.log_level, cli.debug)?;

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "configuration loaded");

    dispatch(&cli, config).await.map_err(|err| {
        error!("Command failed: {:#}", err);
        err
    })
}
