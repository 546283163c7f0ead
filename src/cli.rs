//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bootregion")]
#[command(author, version, about = "Bootloader storage regions on host images", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Board file (TOML) describing memory, devices, environment and FAT mount
    #[arg(short, long, global = true, default_value = "board.toml")]
    pub board: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered drivers
    Drivers,

    /// Show driver information for a region
    Info {
        /// Region, e.g. "nor:0x30000+16k" or "fat:"
        region: String,
    },

    /// Hex dump a region
    Dump {
        /// Region to dump
        region: String,

        /// Stop after this many bytes
        #[arg(short, long, value_parser = parse_size_arg)]
        length: Option<u64>,
    },

    /// Copy one region into another
    Copy {
        /// Source region
        src: String,

        /// Destination region
        dst: String,

        /// Erase the destination first (NOR programming only clears bits)
        #[arg(long)]
        erase: bool,

        /// Don't show a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Erase a region
    Erase {
        /// Region to erase
        region: String,
    },

    /// Print environment keys and values
    Printenv {
        /// Key to print; all keys when omitted
        key: Option<String>,

        /// Also print key descriptions
        #[arg(short, long)]
        long: bool,
    },

    /// Store an environment value
    Setenv {
        /// Key name
        key: String,

        /// Value; words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },

    /// Revert an environment key to its default
    Unsetenv {
        /// Key name
        key: String,
    },

    /// Erase the whole environment region
    Eraseenv,

    /// Rewrite the environment with only its live records
    Compactenv,

    /// List a directory on the FAT volume
    Ls {
        /// Directory region, e.g. "fat:" or "fat:boot"
        #[arg(default_value = "fat:")]
        region: String,
    },

    /// Print a file to stdout
    Cat {
        /// File region, e.g. "fat:boot/cmdline"
        region: String,
    },
}

/// Parse a byte count with the region number syntax ("4096", "0x1000", "64k")
fn parse_size_arg(s: &str) -> Result<u64, String> {
    bootregion_core::region::parse_count(s).map_err(|e| format!("Invalid size '{}': {}", s, e))
}
