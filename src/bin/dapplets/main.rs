//! Dapplets CLI - publishes dapplet modules

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        commands::report(&e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over the default
    let default_filter = if cli.verbose {
        "dapplets=debug"
    } else if cli.quiet {
        "dapplets=error"
    } else {
        "dapplets=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Deploy(args) => runtime.block_on(commands::deploy::execute(&cli, args)),
    }
}
