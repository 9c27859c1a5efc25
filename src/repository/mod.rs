// src/repository/mod.rs

//! Where community recipes come from
//!
//! The registry answers "does this package exist and who maintains it";
//! the recipe itself is fetched from the package's git repository.

pub mod aur;
pub mod git;

pub use aur::{AurRegistry, PackageInfo, Registry, RegistryConfig};
pub use git::{GitCli, GitConfig, Vcs};
