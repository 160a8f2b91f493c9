//! ## flowguard-cli
//! **Command line shell around the capture-to-verdict pipeline**
//!
//! `run` listens on a live interface, `replay` feeds a capture file through
//! the same pipeline, `interfaces` lists what can be opened. Ctrl-C stops a
//! run and shuts the inference worker down before exiting.

use clap::Parser;

mod commands;
mod presenter;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
