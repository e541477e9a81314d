// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pbresp
//!
//! Command-line interface for shared-memory inference responses.
//!
//! ## Usage
//! ```bash
//! # Encode a response into a file-backed arena (prints the handle)
//! pbresp encode --arena /dev/shm/pbresp.arena --output logits:f32:1x1000
//!
//! # Decode it, possibly from another process
//! pbresp decode --arena /dev/shm/pbresp.arena --handle 0x50
//!
//! # Decode, prune and deliver it to a loopback host
//! pbresp -v deliver --arena /dev/shm/pbresp.arena --handle 0x50 --requested logits
//!
//! # Show arena usage
//! pbresp status --arena /dev/shm/pbresp.arena
//! ```

mod commands;

use clap::{Parser, Subcommand};
use shm_arena::ShmHandle;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pbresp",
    about = "Encode, decode and deliver inference responses through shared memory",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file. Command-line flags take precedence.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an arena and encode a synthetic response into it.
    Encode {
        /// Arena backing file (created or truncated).
        #[arg(short, long)]
        arena: Option<PathBuf>,

        /// Arena capacity (e.g., "64M", "1G").
        #[arg(short, long)]
        budget: Option<String>,

        /// Output tensor as name:dtype:dims, e.g. "logits:f32:1x1000". Repeatable.
        #[arg(short, long = "output", value_name = "NAME:DTYPE:DIMS")]
        outputs: Vec<commands::OutputSpec>,

        /// Encode an error response with this message instead of outputs.
        #[arg(short, long)]
        error: Option<String>,
    },

    /// Decode a response from an existing arena and print it.
    Decode {
        #[arg(short, long)]
        arena: Option<PathBuf>,

        /// Response handle printed by `encode` (hex with 0x, or decimal).
        #[arg(long, value_parser = commands::parse_handle)]
        handle: ShmHandle,
    },

    /// Decode a response and deliver it to an in-process loopback host.
    Deliver {
        #[arg(short, long)]
        arena: Option<PathBuf>,

        #[arg(long, value_parser = commands::parse_handle)]
        handle: ShmHandle,

        /// Comma-separated output names to keep; all outputs when omitted.
        #[arg(short, long, value_delimiter = ',')]
        requested: Option<Vec<String>>,

        /// Venue the host grants: as-requested, host, pinned or device.
        #[arg(short, long, default_value = "as-requested")]
        placement: commands::Placement,
    },

    /// Show arena capacity and usage.
    Status {
        #[arg(short, long)]
        arena: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Encode {
            arena,
            budget,
            outputs,
            error,
        } => {
            let config = commands::load_config(cli.config.as_deref(), arena, budget)?;
            commands::encode::execute(&config, outputs, error)
        }
        Commands::Decode { arena, handle } => {
            let config = commands::load_config(cli.config.as_deref(), arena, None)?;
            commands::decode::execute(&config, handle)
        }
        Commands::Deliver {
            arena,
            handle,
            requested,
            placement,
        } => {
            let config = commands::load_config(cli.config.as_deref(), arena, None)?;
            commands::deliver::execute(&config, handle, requested, placement)
        }
        Commands::Status { arena } => {
            let config = commands::load_config(cli.config.as_deref(), arena, None)?;
            commands::status::execute(&config)
        }
    }
}
