//! Binary entry point for taskpilot-rs.

// The binary prints its final output; everything else logs via tracing.
#![allow(clippy::print_stdout)]

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskpilot_rs::cli::{Cli, execute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = execute(&cli).await?;
    println!("{output}");
    Ok(())
}
