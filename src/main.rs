//! Q Developer CLI supervisor binary
//!
//! Run with: cargo run -- serve
//!
//! For help: cargo run -- --help

use clap::Parser;
use qdev_supervisor::{cli::Cli, run_with_cli, shutdown_otel};
use std::io::IsTerminal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Signals are handled inside the runner so live runs get aborted
    let result = run_with_cli(&cli).await;

    // Shutdown OpenTelemetry to flush all pending spans
    shutdown_otel();

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // stdout carries protocol messages, errors go to stderr
            eprintln!("Error: {}", e);

            if std::io::stdin().is_terminal() {
                eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
                eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
            }

            std::process::exit(1);
        }
    }
}
