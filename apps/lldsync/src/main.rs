//! # lldsync
//!
//! The binary for the lldsync discovery reconciliation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/lldsync (THE BINARY)          │
//! │                                              │
//! │   ┌──────────┐  ┌───────────┐  ┌──────────┐  │
//! │   │   CLI    │  │  config   │  │ row files│  │
//! │   │  (clap)  │  │  (toml)   │  │  (json)  │  │
//! │   └────┬─────┘  └─────┬─────┘  └────┬─────┘  │
//! │        └──────────────┼─────────────┘        │
//! │                       ▼                      │
//! │               ┌──────────────┐               │
//! │               │ lldsync-core │               │
//! │               │ (THE ENGINE) │               │
//! │               └──────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! lldsync init
//! lldsync seed -f discovery.json
//! lldsync run --host 1 --rule 10 -f rows.json
//! lldsync items --rule 10
//! ```

use clap::Parser;
use lldsync::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // LLDSYNC_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("LLDSYNC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "lldsync=debug,lldsync_core=debug"
    } else {
        "lldsync=info,lldsync_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!("lldsync v{} - low-level discovery reconciliation", env!("CARGO_PKG_VERSION"));
    println!();
}
