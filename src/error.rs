// src/error.rs

//! Error types for the community-build pipeline

use crate::build::Stage;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Package does not exist in the registry
    #[error("Package '{0}' not found in registry")]
    NotFound(String),

    /// Registry lookup failed for a reason other than not-found
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Cloning or updating the recipe repository failed
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// The recipe file could not be read
    #[error("Failed to read recipe {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The reviewer rejected the recipe
    #[error("Build of '{0}' rejected during review")]
    UserAbort(String),

    /// Dependency probing or installation failed
    #[error("Dependency error: {0}")]
    DependencyError(String),

    /// The sandbox launcher could not set up isolation
    #[error("Sandbox setup failed: {0}")]
    SandboxSetupError(String),

    /// The build command itself failed
    #[error("Build failed: {0}")]
    BuildError(String),

    /// The build finished but produced no package archives
    #[error("No package archives found in {}", .0.display())]
    NoArtifactsError(PathBuf),

    /// Installing built archives failed
    #[error("Install failed: {0}")]
    InstallError(String),

    /// An external process was terminated by a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// A cache operation referenced a package that is not cached
    #[error("Package '{0}' is not in the build cache")]
    NotCached(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl Error {
    /// Whether this error represents a negative review verdict rather than a failure
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Error::UserAbort(_))
    }

    /// Tag this error with the pipeline stage it came from
    pub fn at(self, stage: Stage) -> StageError {
        StageError {
            stage,
            source: self,
        }
    }
}

/// An error tagged with the pipeline stage that produced it
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    pub fn is_user_abort(&self) -> bool {
        self.source.is_user_abort()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}
