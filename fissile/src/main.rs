//! Thin entrypoint: read a single config file path from argv and run one
//! build end to end. `anyhow` prints a nicely formatted error chain with
//! `Debug`, so returning a `Result` from `main` is enough to surface a
//! failing `snafu` context chain without any manual formatting.

mod config;
mod run;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: fissile <config.toml>")?;
    let config = config::Config::load(&config_path)?;
    run::build(config).await
}
