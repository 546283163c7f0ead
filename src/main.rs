//! bootregion - Bootloader storage regions on host images
//!
//! Loads a board file describing emulated storage (a RAM arena, NOR flash
//! and block devices backed by image files), assembles a storage session
//! and runs one bootloader-style command against it.
//!
//! # Region strings
//!
//! Every command addresses storage with the bootloader's region syntax:
//! `driver:start+length`, for example `nor:0x30000+16k`, `mem:0x20200000`
//! or `fat://1/boot/zimage`. The driver name may be any unique prefix and
//! defaults to `memory`.
//!
//! Modified NOR and block images are written back when the command
//! succeeds.

mod board;
mod cli;
mod commands;

use board::Board;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let mut board = Board::load(&cli.board)?;

    match cli.command {
        Commands::Drivers => commands::list::list_drivers(board.session()),
        Commands::Info { region } => commands::region::run_info(board.session(), &region)?,
        Commands::Dump { region, length } => {
            commands::region::run_dump(board.session(), &region, length)?
        }
        Commands::Copy {
            src,
            dst,
            erase,
            no_progress,
        } => commands::region::run_copy(board.session(), &src, &dst, erase, !no_progress)?,
        Commands::Erase { region } => commands::region::run_erase(board.session(), &region)?,
        Commands::Printenv { key, long } => {
            commands::env::run_printenv(board.session().env(), key.as_deref(), long)?
        }
        Commands::Setenv { key, value } => {
            commands::env::run_setenv(board.session_mut().env_mut(), &key, &value.join(" "))?
        }
        Commands::Unsetenv { key } => {
            commands::env::run_unsetenv(board.session_mut().env_mut(), &key)?
        }
        Commands::Eraseenv => commands::env::run_eraseenv(board.session_mut().env_mut())?,
        Commands::Compactenv => commands::env::run_compactenv(board.session_mut().env_mut())?,
        Commands::Ls { region } => commands::fat::run_ls(board.session(), &region)?,
        Commands::Cat { region } => commands::fat::run_cat(board.session(), &region)?,
    }

    board.save()?;
    Ok(())
}
