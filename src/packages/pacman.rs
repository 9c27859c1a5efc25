// src/packages/pacman.rs

//! Native package manager access through the `pacman` command-line tool
//!
//! The build pipeline needs three things from the host package manager:
//! ask whether a dependency is satisfied, install missing dependencies from
//! the sync repositories, and install the archives it built.

use crate::error::{Error, Result};
use crate::process::{self, CancelToken};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// `pacman -T` exit status for unsatisfied dependencies
const DEPTEST_MISSING: i32 = 127;

/// Flags shared by both install modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Mark packages as installed as a dependency
    pub as_deps: bool,
    /// Do not ask for confirmation
    pub no_confirm: bool,
}

/// Operations on the host package database
pub trait NativePackageManager: Send + Sync {
    /// Whether a package named `name` (or providing it) is installed
    fn is_installed(&self, name: &str, cancel: &CancelToken) -> Result<bool>;

    /// Install packages from the sync repositories
    fn install(&self, names: &[String], opts: InstallOptions, cancel: &CancelToken) -> Result<()>;

    /// Install local package archives
    fn install_local(
        &self,
        paths: &[PathBuf],
        opts: InstallOptions,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Native package manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    pub pacman: PathBuf,
    /// Prefix for commands that modify the system; empty runs pacman directly
    pub privilege_command: Option<PathBuf>,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            pacman: PathBuf::from("pacman"),
            privilege_command: Some(PathBuf::from("sudo")),
        }
    }
}

/// [`NativePackageManager`] backed by pacman
#[derive(Debug, Clone)]
pub struct Pacman {
    program: PathBuf,
    privilege_command: Option<PathBuf>,
}

impl Pacman {
    pub fn new(program: impl Into<PathBuf>, privilege_command: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            privilege_command,
        }
    }

    pub fn from_config(config: &NativeConfig) -> Self {
        // Root does not need the privilege wrapper
        let privilege_command = if nix::unistd::geteuid().is_root() {
            None
        } else {
            config
                .privilege_command
                .clone()
                .filter(|cmd| !cmd.as_os_str().is_empty())
        };
        Self::new(&config.pacman, privilege_command)
    }

    /// Build the argument vector for a modifying pacman invocation
    pub fn install_args(&self, op: &str, opts: InstallOptions, targets: &[&Path]) -> Vec<String> {
        let mut args = vec![op.to_string()];
        if op == "-S" {
            args.push("--needed".to_string());
        }
        if opts.as_deps {
            args.push("--asdeps".to_string());
        }
        if opts.no_confirm {
            args.push("--noconfirm".to_string());
        }
        args.push("--".to_string());
        args.extend(targets.iter().map(|t| t.to_string_lossy().into_owned()));
        args
    }

    fn privileged(&self, args: &[String]) -> Command {
        match &self.privilege_command {
            Some(wrapper) => {
                let mut cmd = Command::new(wrapper);
                cmd.arg(&self.program).args(args);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.program);
                cmd.args(args);
                cmd
            }
        }
    }

    fn run_modifying(
        &self,
        args: Vec<String>,
        cancel: &CancelToken,
        wrap: fn(String) -> Error,
    ) -> Result<()> {
        let mut cmd = self.privileged(&args);
        let status = process::run(&mut cmd, cancel, None).map_err(|e| e.into_error(wrap))?;

        if !status.success() {
            return Err(wrap(format!(
                "pacman {} exited with {}",
                args.first().map(String::as_str).unwrap_or_default(),
                status
            )));
        }
        Ok(())
    }
}

impl Default for Pacman {
    fn default() -> Self {
        Self::from_config(&NativeConfig::default())
    }
}

impl NativePackageManager for Pacman {
    fn is_installed(&self, name: &str, cancel: &CancelToken) -> Result<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-T", "--", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = process::run(&mut cmd, cancel, None).map_err(|e| {
            e.into_error(|msg| Error::DependencyError(format!("{msg}. Is pacman installed?")))
        })?;

        match status.code() {
            Some(0) => Ok(true),
            Some(DEPTEST_MISSING) => {
                debug!("{} is not installed", name);
                Ok(false)
            }
            _ => Err(Error::DependencyError(format!(
                "pacman -T {} exited with {}",
                name, status
            ))),
        }
    }

    fn install(&self, names: &[String], opts: InstallOptions, cancel: &CancelToken) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        info!("Installing {} from sync repositories", names.join(" "));
        let targets: Vec<&Path> = names.iter().map(Path::new).collect();
        self.run_modifying(self.install_args("-S", opts, &targets), cancel, Error::DependencyError)
    }

    fn install_local(
        &self,
        paths: &[PathBuf],
        opts: InstallOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        info!("Installing {} built package(s)", paths.len());
        let targets: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        self.run_modifying(self.install_args("-U", opts, &targets), cancel, Error::InstallError)
    }
}
