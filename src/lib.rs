// src/lib.rs

//! Pacforge
//!
//! Package manager front end whose core is a community-build pipeline:
//! fetch an untrusted PKGBUILD, parse and scan it, put it in front of a
//! human, install its dependencies and build it in a sandbox.
//!
//! # Architecture
//!
//! - Recipes: strategy-chain parser with a dangerous-command scanner
//! - Isolation: declarative profiles run through bubblewrap
//! - Review: interactive or auto-accepting gate before anything executes
//! - Builder: strictly ordered stages, each failure tagged with its stage
//! - Collaborators: registry, git, pacman and the sandbox are injected
//!   behind traits

pub mod build;
pub mod config;
pub mod container;
mod error;
pub mod packages;
pub mod process;
pub mod progress;
pub mod recipe;
pub mod repository;
pub mod review;

pub use build::{BuildOptions, BuildOutcome, Builder, Stage};
pub use config::Config;
pub use container::{BubblewrapExecutor, IsolationProfile, Sandbox, SandboxError};
pub use error::{Error, Result, StageError};
pub use packages::{InstallOptions, NativePackageManager, Pacman};
pub use process::CancelToken;
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, ProgressSink, SilentProgress};
pub use recipe::{BuildRecipe, DangerousCommand, RecipeParser};
pub use repository::{AurRegistry, GitCli, PackageInfo, Registry, Vcs};
pub use review::{AutoAccept, InteractiveReview, ReviewGate, Verdict};
