mod args;
mod cli;
mod error;
mod history;
mod model;
mod orchestrator;
mod runner;
mod status;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging(args: &cli::Cli) -> Result<()> {
    let level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
    );

    if let Some(path) = args.log_file.as_deref() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else if args.text || cfg!(not(feature = "tui")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }
    // Otherwise the TUI owns the terminal and logging stays off.
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(&args)?;

    // The session history must not outlive this process, whichever way we leave `run`.
    let code = {
        let _purge = history::PurgeOnDrop::new(args.history_path());
        cli::run(args).await?
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
