mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use mediafetch::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run => commands::run(&config).await?,
        Commands::Download(args) => commands::download(&config, args).await?,
        Commands::Schedule(command) => commands::schedule(&config, command).await?,
        Commands::History(command) => commands::history(&config, command)?,
        Commands::Sites => commands::sites(&config),
    }

    Ok(())
}
