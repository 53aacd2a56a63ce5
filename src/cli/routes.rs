use anyhow::{bail, Result};
use clap::Args;
use mcloud_wd_bridge::{route_to_command_name, METHOD_MAP};

use crate::config::DriverConfig;

#[derive(Args, Clone)]
pub struct ResolveArgs {
    /// HTTP method (GET, POST or DELETE)
    pub method: String,

    /// Request path, with or without the base path and session segment
    pub path: String,

    /// Base path to strip (defaults to server.base_path)
    #[arg(long)]
    pub base_path: Option<String>,
}

pub fn resolve(args: &ResolveArgs, config: &DriverConfig) -> Option<&'static str> {
    let mut policy = config.bridge_policy();
    if let Some(base_path) = &args.base_path {
        policy.base_path = base_path.clone();
    }
    route_to_command_name(&args.path, &args.method, &policy.normalized_base_path())
}

pub fn cmd_resolve(args: ResolveArgs, config: &DriverConfig) -> Result<()> {
    match resolve(&args, config) {
        Some(command) => {
            println!("{command}");
            Ok(())
        }
        None => bail!("no command"),
    }
}

/// One line per method entry: method, pattern, command (`-` when reserved).
pub fn route_lines() -> Vec<String> {
    METHOD_MAP
        .iter()
        .flat_map(|route| {
            route.methods.iter().map(move |(method, spec)| {
                format!(
                    "{:<7} {:<64} {}",
                    method.as_str(),
                    route.pattern,
                    spec.command.unwrap_or("-")
                )
            })
        })
        .collect()
}

pub fn cmd_routes() -> Result<()> {
    for line in route_lines() {
        println!("{line}");
    }
    Ok(())
}
