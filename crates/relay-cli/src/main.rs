//! Relay CLI entry point.

use clap::Parser;

use relay_cli::cli::Cli;
use relay_cli::commands;
use relay_core::{config, logging};

#[tokio::main]
async fn main() {
    config::load_env();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let state_dir = cli.state_dir();
    if let Err(e) = commands::execute(cli.command, &state_dir).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
