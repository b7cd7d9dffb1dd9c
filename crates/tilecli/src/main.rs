//! minitile CLI entry point.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = commands::Context::load(&cli)?;
    match cli.command {
        Commands::List(args) => commands::list(ctx, args),
        Commands::Install(args) => commands::install(ctx, args),
        Commands::Run(args) => commands::run(ctx, args),
        Commands::Config(args) => commands::config(ctx, args),
    }
}

/// `RUST_LOG` wins; otherwise `-v` / `-vv` raise the default `info` level.
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
