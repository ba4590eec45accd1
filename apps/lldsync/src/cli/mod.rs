//! # lldsync CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty store
//! - `seed` - Apply a discovery configuration (hosts, rules, prototypes)
//! - `run` - Reconcile one rule's discovered rows
//! - `status` - Show entity counts
//! - `items` - List a rule's discovered items

mod commands;

use crate::config::{AppConfig, Backend, Settings};
use clap::{Parser, Subcommand};
use lldsync_core::LldError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// lldsync - low-level discovery reconciliation
///
/// Turns rows reported by a discovery rule into items, applications and
/// their links, and ages out whatever discovery stopped reporting.
#[derive(Parser, Debug)]
#[command(name = "lldsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the store (default: lldsync.redb)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Path to an lldsync.toml configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty store
    Init {
        /// Force initialization even if the store exists
        #[arg(short, long)]
        force: bool,
    },

    /// Apply a JSON discovery configuration
    Seed {
        /// Path to the configuration file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run one discovery cycle
    Run {
        /// Host the rule belongs to
        #[arg(long)]
        host: u64,

        /// Discovery rule id
        #[arg(long)]
        rule: u64,

        /// Path to the JSON row file
        #[arg(short, long)]
        file: PathBuf,

        /// Keep lost entities this many days (overrides the rule)
        #[arg(long)]
        lifetime_days: Option<u16>,

        /// Cycle timestamp in unix seconds (default: now)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Show store status
    Status,

    /// List discovered items of a rule
    Items {
        /// Discovery rule id
        #[arg(long)]
        rule: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), LldError> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let settings = Settings::resolve(&config, cli.database, cli.backend);
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&settings, force),
        Some(Commands::Seed { file }) => cmd_seed(&settings, json_mode, &file),
        Some(Commands::Run {
            host,
            rule,
            file,
            lifetime_days,
            now,
        }) => cmd_run(
            &settings,
            json_mode,
            &RunArgs {
                host,
                rule,
                file,
                lifetime_days,
                now,
            },
        ),
        Some(Commands::Items { rule }) => cmd_items(&settings, json_mode, rule),
        Some(Commands::Status) | None => cmd_status(&settings, json_mode),
    }
}
