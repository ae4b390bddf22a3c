//! Attrium command-line front end.
//!
//! Usage:
//!   attrium --config attrium.toml definitions list
//!   attrium --config attrium.toml import stash products.csv --resource product
//!   attrium --config attrium.toml import hoard --all
//!
//! Without `--config` everything runs against an in-memory store that is
//! gone when the command exits.

use anyhow::Result;
use attrium_cli::{run, Cli};
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(&cli, &mut out)
}
