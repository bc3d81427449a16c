mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "rundeck-cleanup")]
#[command(about = "Delete old execution data from a Rundeck database")]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout carries only the rendered statements.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::run::run(cli.args).await
}
