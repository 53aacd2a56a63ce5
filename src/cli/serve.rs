use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::server::DriverServer;

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Port to listen on (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Prefix of every WebDriver route (overrides server.base_path)
    #[arg(long)]
    pub base_path: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut DriverConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(base_path) = self.base_path {
            config.server.base_path = base_path;
        }
    }
}

pub async fn cmd_serve(args: ServeArgs, mut config: DriverConfig) -> Result<()> {
    args.apply(&mut config);

    let server = DriverServer::compose(&config);
    let _cleanup = server.exit_cleanup();
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind driver server on {}", addr))?;
    info!(
        "WebDriver server listening on http://{}{}",
        addr,
        server.policy.snapshot().normalized_base_path()
    );

    axum::serve(listener, server.router.clone())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("driver server terminated unexpectedly")?;

    server.shutdown().await;
    info!("driver server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_configuration() {
        let mut config = DriverConfig::default();
        ServeArgs {
            port: Some(9999),
            host: None,
            base_path: Some("/".into()),
        }
        .apply(&mut config);
        assert_eq!(config.bind_addr(), "0.0.0.0:9999");
        assert_eq!(config.server.base_path, "/");
    }
}
