// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

/// Shadow — autonomous coding-agent platform (task streaming and execution
/// kernel).
#[derive(Parser, Debug)]
#[command(name = "shadow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log to stderr at debug level (RUST_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server: HTTP surface, task kernel, and cleanup scheduler.
    ///
    /// All configuration is environment-driven; see `show-config` for the
    /// resolved values.
    Serve,

    /// Print the resolved configuration and exit.
    ShowConfig,
}
