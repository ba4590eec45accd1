//! # lldsync
//!
//! Command line front end of `lldsync-core`: configuration, row file
//! parsing and the subcommands. The binary in `main.rs` only sets up
//! logging and dispatches.

pub mod cli;
pub mod config;
pub mod rows;
