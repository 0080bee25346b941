mod anthropic_classifier;
mod bridge_runtime;
mod command_executor;
mod member_directory;
mod slack_format;
mod slack_messenger;

use anyhow::Result;
use clap::Parser;
use relay_cli::Cli;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::bridge_runtime::run_bridge;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.validate()?;
    run_bridge(cli).await
}
