use clap::Parser;
use mcctl_cli::Cli;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` has to be loaded before clap reads env-backed flags.
    let dotenv = dotenvy::dotenv();
    mcctl_cli::setup_tracing();
    if let Err(err) = dotenv
        && !err.not_found()
    {
        warn!(error = %err, "failed to load .env");
    }

    let cli = Cli::parse();
    mcctl_cli::run(cli).await
}
