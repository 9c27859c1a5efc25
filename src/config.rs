// src/config.rs

//! Configuration file handling
//!
//! Settings live in `$XDG_CONFIG_HOME/pacforge/config.toml`. Every field has
//! a default, so a missing file or a partial one is fine:
//!
//! ```toml
//! cache_dir = "/var/cache/pacforge"
//!
//! [parser]
//! timeout_secs = 60
//! shell = "bash"
//! scan_policy = "per-rule"
//! allow_host_eval = false
//!
//! [sandbox]
//! enabled = true
//! launcher = "bwrap"
//!
//! [review]
//! enabled = true
//!
//! [registry]
//! url = "https://aur.archlinux.org"
//! timeout_secs = 30
//!
//! [native]
//! pacman = "pacman"
//! privilege_command = "sudo"
//!
//! [build]
//! makepkg = "makepkg"
//!
//! [git]
//! program = "git"
//! ```

use crate::build::DEFAULT_MAKEPKG;
use crate::container::SandboxConfig;
use crate::error::{Error, Result};
use crate::packages::NativeConfig;
use crate::recipe::ParserConfig;
use crate::repository::{GitConfig, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Review settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Ask before building a recipe
    pub enabled: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Build tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MakepkgConfig {
    pub makepkg: PathBuf,
}

impl Default for MakepkgConfig {
    fn default() -> Self {
        Self {
            makepkg: PathBuf::from(DEFAULT_MAKEPKG),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where recipe repositories are cloned and built
    pub cache_dir: PathBuf,
    pub parser: ParserConfig,
    pub sandbox: SandboxConfig,
    pub review: ReviewConfig,
    pub registry: RegistryConfig,
    pub native: NativeConfig,
    pub build: MakepkgConfig,
    pub git: GitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            parser: ParserConfig::default(),
            sandbox: SandboxConfig::default(),
            review: ReviewConfig::default(),
            registry: RegistryConfig::default(),
            native: NativeConfig::default(),
            build: MakepkgConfig::default(),
            git: GitConfig::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pacforge")
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pacforge").join("config.toml"))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Load the file at `path`, or the default location, falling back to
    /// defaults when the default file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError("cache_dir must not be empty".to_string()));
        }
        if self.parser.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "parser.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.registry.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "registry.timeout_secs must be greater than zero".to_string(),
            ));
        }
        url::Url::parse(&self.registry.url).map_err(|e| {
            Error::ConfigError(format!("registry.url '{}' is invalid: {e}", self.registry.url))
        })?;

        let programs = [
            ("parser.shell", &self.parser.shell),
            ("sandbox.launcher", &self.sandbox.launcher),
            ("native.pacman", &self.native.pacman),
            ("build.makepkg", &self.build.makepkg),
            ("git.program", &self.git.program),
        ];
        for (key, program) in programs {
            if program.as_os_str().is_empty() {
                return Err(Error::ConfigError(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }
}
