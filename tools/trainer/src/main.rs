pub mod learn;
pub mod publish;
pub mod report;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use learn::Args;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    learn::learn_model(&args).context("training digit classifier")
}
