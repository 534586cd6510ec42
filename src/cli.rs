use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "locktrim",
    version,
    about = "Consolidate duplicate dependency versions in yarn/pnpm lockfiles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Lockfile path when no subcommand is given (runs `check`)
    pub path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report which dependencies could share a single resolved version
    Check {
        /// Lockfile path (auto-detected in the current directory by default)
        path: Option<PathBuf>,
    },
    /// Rewrite the lockfile and run the package manager's install step
    Optimise {
        /// Lockfile path (auto-detected in the current directory by default)
        path: Option<PathBuf>,
        /// Skip running `pnpm install` / `yarn install` afterwards
        #[arg(long)]
        no_install: bool,
    },
}
