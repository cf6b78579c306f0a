use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{bundle::BundleCommand, eval::EvalCommand, render::RenderCommand, run::RunCommand};

/// Script console output at every level; other targets at warn.
const DEFAULT_FILTER: &str = "warn,jsrunner::console=debug";

#[derive(Parser)]
#[command(name = "jsrunner", version, about = "Embedded JavaScript runner and React SSR bundler")]
struct Cli {
    /// Path to jsrunner.toml (default: nearest in the current directory or its ancestors)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script on the event loop and print its result
    Run(RunCommand),
    /// Evaluate an expression
    Eval(EvalCommand),
    /// Build the server and client bundles
    Bundle(BundleCommand),
    /// Render a React app to HTML
    Render(RenderCommand),
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Eval(cmd) => cmd.run(&config),
        Commands::Bundle(cmd) => cmd.run(&config),
        Commands::Render(cmd) => cmd.run(&config),
    }
}
