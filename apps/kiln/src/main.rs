//! # Kiln
//!
//! The command line binary of the Kiln incremental rebuild engine.
//!
//! ## Usage
//!
//! ```bash
//! kiln seed -f demo.toml
//! kiln build -p demo
//! kiln touch -p demo app:extra.c --tags c
//! kiln build -p demo --changed app:main.c
//! kiln status -p demo --json-mode
//! ```

use clap::Parser;
use kiln::cli;
use kiln::config::{KilnConfig, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    let mut config = match KilnConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_env();

    // RUST_LOG wins over the configured filter; --verbose over both.
    let directives = if cli.verbose {
        "kiln=debug,kiln_core=debug".to_string()
    } else {
        config.log.filter.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .ok()
        .filter(|_| !cli.verbose)
        .unwrap_or_else(|| directives.into());

    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Kiln startup banner.
fn print_banner() {
    println!("kiln v{} - incremental rule re-evaluation", env!("CARGO_PKG_VERSION"));
    println!();
}
