// src/cli.rs
//! CLI definitions for pacforge
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pacforge")]
#[command(author = "Pacforge Contributors")]
#[command(version)]
#[command(about = "Build and install community packages in a sandbox", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (default: $XDG_CONFIG_HOME/pacforge/config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the build cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, review and build packages without installing them
    Build {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        opts: BuildArgs,
    },

    /// Build packages and install the resulting archives
    Install {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        opts: BuildArgs,

        /// Mark the installed packages as dependencies
        #[arg(long)]
        asdeps: bool,
    },

    /// Show registry details and the review summary of a package
    Show {
        /// Package name
        package: String,

        /// Print the cached PKGBUILD with line numbers
        #[arg(long)]
        raw: bool,
    },

    /// Manage the build cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached packages
    List,

    /// Remove cached packages
    Clean {
        /// Package base to remove
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        package: Option<String>,

        /// Remove the whole cache
        #[arg(long)]
        all: bool,
    },
}

/// Flags shared by build and install
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Build even if the package was already built
    #[arg(short, long)]
    pub force: bool,

    /// Remove the previous source tree before building
    #[arg(short = 'C', long)]
    pub clean: bool,

    /// Do not verify source signatures
    #[arg(long)]
    pub skippgpcheck: bool,

    /// Do not ask for confirmation when installing
    #[arg(long)]
    pub noconfirm: bool,

    /// Build directly on the host
    #[arg(long)]
    pub no_sandbox: bool,

    /// Keep extracted sources after building
    #[arg(long)]
    pub keep_sources: bool,

    /// Do not install missing dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Skip the security review
    #[arg(long)]
    pub no_review: bool,
}
