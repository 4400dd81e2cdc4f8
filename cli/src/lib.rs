use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::builder::FalseyValueParser;
use mcctl_core::Bootstrap;
use mcctl_core::Config;
use mcctl_core::ConfigOverrides;
use mcctl_core::LogSink;
use mcctl_core::Supervisor;
use tokio::net::TcpListener;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Runs a Minecraft server and exposes start/stop/command/logs over HTTP.
#[derive(Debug, Parser)]
#[command(name = "mcctl", version)]
pub struct Cli {
    /// Port for the HTTP control API.
    #[arg(long, env = "PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// Development mode: never download or launch the server.
    #[arg(long, env = "dev", value_parser = FalseyValueParser::new())]
    pub dev: bool,

    /// Do not launch the server until `/start` is called.
    #[arg(long = "no-autostart")]
    pub no_autostart: bool,

    /// Directory holding the server installation.
    #[arg(long = "server-dir", value_name = "DIR")]
    pub server_dir: Option<PathBuf>,

    /// Directory served under `/static`.
    #[arg(long = "static-dir", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// TOML config file. Defaults to `mcctl.toml` when present.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            dev: self.dev.then_some(true),
            autostart: self.no_autostart.then_some(false),
            server_dir: self.server_dir.clone(),
            static_dir: self.static_dir.clone(),
        }
    }
}

pub fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Installs the server if needed, starts supervising it and serves the
/// control API until ctrl-c.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_overrides(cli.config.as_deref(), cli.overrides())
        .context("failed to load configuration")?;
    info!(port = config.port, dev = config.dev, "starting control plane");

    let logs = LogSink::with_capacity(config.log_capacity);
    let outcome = Bootstrap::from_config(&config)
        .ensure_installed(&logs)
        .await
        .context("failed to install server")?;
    debug!(?outcome, "bootstrap finished");

    let supervisor = Supervisor::spawn(config.supervisor_options(), logs);
    if config.autostart {
        match supervisor.start().await {
            Ok(output) => debug!(%output, "server started"),
            Err(err) => warn!(error = %err, "failed to start server, waiting for /start"),
        }
    }

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))
        .await
        .with_context(|| format!("failed to bind control API to port {}", config.port))?;
    let router = mcctl_server::router(supervisor.clone(), &config.static_dir);
    mcctl_server::serve(listener, router, shutdown_signal())
        .await
        .context("control API failed")?;

    supervisor
        .shutdown()
        .await
        .context("failed to stop server")?;
    info!("control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flags_map_onto_overrides() {
        let cli = Cli::try_parse_from([
            "mcctl",
            "--port",
            "4000",
            "--dev",
            "--no-autostart",
            "--server-dir",
            "/srv/mc",
        ])
        .expect("parse");

        assert_eq!(
            cli.overrides(),
            ConfigOverrides {
                port: Some(4000),
                dev: Some(true),
                autostart: Some(false),
                server_dir: Some(PathBuf::from("/srv/mc")),
                static_dir: None,
            }
        );
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let cli = Cli::try_parse_from(["mcctl", "--port", "4000"]).expect("parse");
        let overrides = cli.overrides();

        assert_eq!(overrides.autostart, None);
        assert_eq!(overrides.server_dir, None);
    }
}
