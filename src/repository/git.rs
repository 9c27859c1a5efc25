// src/repository/git.rs

//! Recipe repositories over git
//!
//! Every community package lives in its own git repository. The builder
//! clones it into the cache on first use and updates it in place afterwards.

use crate::error::{Error, Result};
use crate::process::{self, CancelToken};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Version-control operations the builder needs
pub trait Vcs: Send + Sync {
    /// Clone `url` into `dest`, which must not exist yet
    fn clone_repo(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<()>;

    /// Bring an existing checkout up to date (pull with rebase)
    fn update(&self, dir: &Path, cancel: &CancelToken) -> Result<()>;

    /// Whether `dir` holds a checkout this backend can update
    fn is_checkout(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }
}

/// Git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub program: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

/// [`Vcs`] implemented by running the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(&config.program)
    }

    fn run(&self, args: &[&OsStr], cancel: &CancelToken) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());

        let status =
            process::run(&mut cmd, cancel, None).map_err(|e| e.into_error(Error::FetchError))?;
        if !status.success() {
            return Err(Error::FetchError(format!(
                "{} {} exited with {}",
                self.program.display(),
                args.first().map(|a| a.to_string_lossy()).unwrap_or_default(),
                status
            )));
        }
        Ok(())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_config(&GitConfig::default())
    }
}

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<()> {
        info!("Cloning {} into {}", url, dest.display());
        self.run(&[OsStr::new("clone"), OsStr::new(url), dest.as_os_str()], cancel)
    }

    fn update(&self, dir: &Path, cancel: &CancelToken) -> Result<()> {
        debug!("Updating checkout {}", dir.display());
        self.run(
            &[
                OsStr::new("-C"),
                dir.as_os_str(),
                OsStr::new("pull"),
                OsStr::new("--rebase"),
            ],
            cancel,
        )
    }
}
