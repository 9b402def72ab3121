//! selfup CLI entry point
//!
//! Parses arguments, sets up logging on stderr and runs the selected
//! command. Errors are rendered through [`user_friendly_error`] and end the
//! process with status 1.

use anyhow::Result;
use clap::Parser;
use selfup::cli;
use selfup::core::error::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // RUST_LOG wins over the verbosity flags
    let filter = match (std::env::var("RUST_LOG"), cli.log_level()) {
        (Ok(directives), _) if !directives.is_empty() => EnvFilter::new(directives),
        (_, Some(level)) => EnvFilter::new(format!("selfup={}", level.as_str().to_ascii_lowercase())),
        (_, None) => EnvFilter::new("off"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
