use anyhow::Result;

use super::commands::Commands;
use super::env::CliArgs;
use super::routes::{cmd_resolve, cmd_routes};
use super::serve::cmd_serve;
use crate::config::DriverConfig;

pub async fn dispatch(cli: &CliArgs, config: DriverConfig) -> Result<()> {
    match cli.command.clone() {
        Commands::Serve(args) => cmd_serve(args, config).await,
        Commands::Resolve(args) => cmd_resolve(args, &config),
        Commands::Routes => cmd_routes(),
    }
}
