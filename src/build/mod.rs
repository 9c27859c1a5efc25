// src/build/mod.rs

//! The community-build pipeline
//!
//! A [`Builder`] takes a package name from the command line to installed
//! archives through a fixed sequence of stages:
//!
//! 1. **Resolve**: look the package up in the registry
//! 2. **Fetch**: clone or update its recipe repository in the cache
//! 3. **Parse**: read the PKGBUILD and scan it
//! 4. **Review**: let a human accept or reject the recipe
//! 5. **Dependencies**: install whatever the recipe needs
//! 6. **Build**: run makepkg, sandboxed when possible
//! 7. **Collect**: find the package archives it produced
//! 8. **Install**: hand them to the native package manager
//!
//! Stages run strictly in order and the first failure ends the run; the
//! error says which stage failed. The only retry is in the build stage: when
//! the sandbox itself cannot be set up, the same command runs once more
//! without it. A failing build is never retried.
//!
//! # Example
//!
//! ```ignore
//! let builder = Builder::new(cache_root, registry, git, pacman, bwrap)
//!     .with_options(BuildOptions { review: false, ..Default::default() });
//! let outcome = builder.build_and_install("yay")?;
//! ```

pub mod deps;

pub use deps::{DependencyResolver, DependencyResult, bare_name};

use crate::container::{IsolationProfile, Sandbox, SandboxError};
use crate::error::{Error, Result, StageError};
use crate::packages::{InstallOptions, NativePackageManager};
use crate::process::CancelToken;
use crate::progress::{ProgressSink, SilentProgress};
use crate::recipe::{BuildRecipe, ParserConfig, RECIPE_FILE, RecipeParser};
use crate::repository::{PackageInfo, Registry, Vcs};
use crate::review::{AutoAccept, ReviewGate, Verdict};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default build tool
pub const DEFAULT_MAKEPKG: &str = "makepkg";

/// File name endings of package archives makepkg produces
const ARTIFACT_SUFFIXES: &[&str] = &[
    ".pkg.tar",
    ".pkg.tar.zst",
    ".pkg.tar.xz",
    ".pkg.tar.gz",
    ".pkg.tar.bz2",
    ".pkg.tar.lz4",
    ".pkg.tar.lzo",
    ".pkg.tar.Z",
];

/// Whether `file_name` looks like a package archive (signatures excluded)
pub fn is_artifact(file_name: &str) -> bool {
    ARTIFACT_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

fn is_signature(file_name: &str) -> bool {
    file_name
        .strip_suffix(".sig")
        .is_some_and(is_artifact)
}

fn file_name_matches(path: &Path, predicate: fn(&str) -> bool) -> bool {
    path.file_name()
        .map(|n| predicate(&n.to_string_lossy()))
        .unwrap_or(false)
}

/// Regular files in `dir` that look like archives or their signatures
fn archive_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.pkg.tar*",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::IoError(format!("Invalid artifact pattern {pattern}: {e}")))?;

    Ok(entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect())
}

/// Delete archives left in `dir` by an earlier build
///
/// Collection picks up every archive in the directory, so anything still
/// there from a previous version would be installed alongside the new one.
fn remove_stale_archives(dir: &Path) -> Result<()> {
    for path in archive_files(dir)? {
        if file_name_matches(&path, is_artifact) || file_name_matches(&path, is_signature) {
            debug!("Removing stale archive {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Resolve,
    Fetch,
    Parse,
    Review,
    Dependencies,
    Build,
    Collect,
    Install,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Resolve,
        Stage::Fetch,
        Stage::Parse,
        Stage::Review,
        Stage::Dependencies,
        Stage::Build,
        Stage::Collect,
        Stage::Install,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Review => "review",
            Stage::Dependencies => "dependencies",
            Stage::Build => "build",
            Stage::Collect => "collect",
            Stage::Install => "install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-build settings
#[derive(Clone)]
pub struct BuildOptions {
    /// Rebuild even if the package was already built (`makepkg -f`)
    pub force: bool,
    /// Remove the previous source tree before building (`makepkg -C`)
    pub clean: bool,
    pub skip_pgp_check: bool,
    pub no_confirm: bool,
    /// Build inside the sandbox when it is available
    pub sandbox: bool,
    /// Keep the extracted sources after a successful build
    pub keep_sources: bool,
    /// Install missing dependencies before building
    pub install_deps: bool,
    /// Mark installed artifacts as dependencies
    pub as_deps: bool,
    pub verbose: bool,
    /// Ask `reviewer` before building
    pub review: bool,
    pub reviewer: Arc<dyn ReviewGate>,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancelToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            force: false,
            clean: false,
            skip_pgp_check: false,
            no_confirm: false,
            sandbox: true,
            keep_sources: false,
            install_deps: true,
            as_deps: false,
            verbose: false,
            review: true,
            reviewer: Arc::new(AutoAccept),
            progress: Arc::new(SilentProgress),
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("force", &self.force)
            .field("clean", &self.clean)
            .field("skip_pgp_check", &self.skip_pgp_check)
            .field("no_confirm", &self.no_confirm)
            .field("sandbox", &self.sandbox)
            .field("keep_sources", &self.keep_sources)
            .field("install_deps", &self.install_deps)
            .field("as_deps", &self.as_deps)
            .field("verbose", &self.verbose)
            .field("review", &self.review)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// What a successful pipeline run produced
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub info: PackageInfo,
    pub recipe: BuildRecipe,
    /// Package archives, sorted by path
    pub artifacts: Vec<PathBuf>,
    /// Dependencies installed for this build
    pub installed_dependencies: Vec<String>,
    /// Whether makepkg ran inside the sandbox
    pub sandboxed: bool,
    /// Whether the artifacts were installed
    pub installed: bool,
}

type StageResult<T> = std::result::Result<T, StageError>;

/// Runs the build pipeline against a package cache
pub struct Builder {
    cache_root: PathBuf,
    registry: Arc<dyn Registry>,
    vcs: Arc<dyn Vcs>,
    native: Arc<dyn NativePackageManager>,
    sandbox: Arc<dyn Sandbox>,
    parser: RecipeParser,
    makepkg: PathBuf,
    options: BuildOptions,
}

impl Builder {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        registry: Arc<dyn Registry>,
        vcs: Arc<dyn Vcs>,
        native: Arc<dyn NativePackageManager>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            registry,
            vcs,
            native,
            parser: RecipeParser::sandboxed(&ParserConfig::default(), sandbox.clone()),
            sandbox,
            makepkg: PathBuf::from(DEFAULT_MAKEPKG),
            options: BuildOptions::default(),
        }
    }

    pub fn with_parser(mut self, parser: RecipeParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_makepkg(mut self, makepkg: impl Into<PathBuf>) -> Self {
        self.makepkg = makepkg.into();
        self
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: BuildOptions) {
        self.options = options;
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Run every stage up to and including Collect
    pub fn build(&self, name: &str) -> StageResult<BuildOutcome> {
        let info = self.resolve(name).map_err(|e| e.at(Stage::Resolve))?;
        let dir = self.fetch(&info).map_err(|e| e.at(Stage::Fetch))?;
        let recipe = self.parse(&dir).map_err(|e| e.at(Stage::Parse))?;
        self.review(&recipe, &info).map_err(|e| e.at(Stage::Review))?;
        let installed_dependencies = self
            .install_dependencies(&recipe)
            .map_err(|e| e.at(Stage::Dependencies))?;
        let sandboxed = self.run_build(&recipe, &dir).map_err(|e| e.at(Stage::Build))?;
        let artifacts = self.collect(&dir).map_err(|e| e.at(Stage::Collect))?;

        info!(
            "Built {} {} ({} archive(s))",
            recipe.name(),
            recipe.full_version(),
            artifacts.len()
        );

        Ok(BuildOutcome {
            info,
            recipe,
            artifacts,
            installed_dependencies,
            sandboxed,
            installed: false,
        })
    }

    /// Run the whole pipeline, installing the built archives at the end
    pub fn build_and_install(&self, name: &str) -> StageResult<BuildOutcome> {
        let mut outcome = self.build(name)?;
        self.install(&outcome.artifacts)
            .map_err(|e| e.at(Stage::Install))?;
        outcome.installed = true;
        Ok(outcome)
    }

    fn notify(&self, stage: Stage, message: &str) {
        debug!("[{}] {}", stage, message);
        self.options.progress.stage(stage, message);
    }

    fn resolve(&self, name: &str) -> Result<PackageInfo> {
        self.notify(Stage::Resolve, &format!("Looking up {name}"));
        self.registry
            .package(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn fetch(&self, info: &PackageInfo) -> Result<PathBuf> {
        self.notify(Stage::Fetch, &format!("Fetching {}", info.git_clone_url));
        let dir = self.package_dir(&info.package_base)?;
        let cancel = &self.options.cancel;

        fs::create_dir_all(&self.cache_root).map_err(|e| {
            Error::FetchError(format!(
                "Failed to create cache directory {}: {e}",
                self.cache_root.display()
            ))
        })?;

        if dir.exists() {
            if self.vcs.is_checkout(&dir) {
                match self.vcs.update(&dir, cancel) {
                    Ok(()) => return Ok(dir),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => warn!("Updating {} failed ({}), recloning", dir.display(), e),
                }
            } else {
                warn!("{} is not a checkout, recloning", dir.display());
            }
            remove_dir(&dir).map_err(Error::FetchError)?;
        }

        self.vcs.clone_repo(&info.git_clone_url, &dir, cancel)?;
        Ok(dir)
    }

    fn parse(&self, dir: &Path) -> Result<BuildRecipe> {
        let path = dir.join(RECIPE_FILE);
        self.notify(Stage::Parse, &format!("Parsing {}", path.display()));
        let recipe = self.parser.parse(&path)?;
        if recipe.has_dangerous_commands() {
            warn!(
                "{}: {} suspicious line(s) in {}",
                recipe.name(),
                recipe.dangerous.len(),
                RECIPE_FILE
            );
        }
        Ok(recipe)
    }

    fn review(&self, recipe: &BuildRecipe, info: &PackageInfo) -> Result<()> {
        let gate: &dyn ReviewGate = if self.options.review {
            self.notify(Stage::Review, &format!("Reviewing {}", recipe.name()));
            self.options.reviewer.as_ref()
        } else {
            self.notify(Stage::Review, "Review disabled, accepting");
            &AutoAccept
        };
        match gate.review(recipe, info)? {
            Verdict::Accept => Ok(()),
            Verdict::Reject => Err(Error::UserAbort(recipe.name().to_string())),
        }
    }

    fn install_dependencies(&self, recipe: &BuildRecipe) -> Result<Vec<String>> {
        if !self.options.install_deps {
            self.notify(Stage::Dependencies, "Skipping dependency installation");
            return Ok(Vec::new());
        }
        self.notify(Stage::Dependencies, "Checking dependencies");
        let resolver = DependencyResolver::new(self.native.as_ref());
        let result = resolver.resolve(recipe, self.options.no_confirm, &self.options.cancel)?;
        Ok(result.newly_installed)
    }

    /// makepkg invocation for a build in `dir`
    ///
    /// `PKGDEST` points at the build directory so archives land where the
    /// collect stage looks, whatever makepkg.conf says.
    pub fn makepkg_command(&self, dir: &Path) -> Vec<String> {
        let opts = &self.options;
        let mut cmd = vec![
            "env".to_string(),
            format!("PKGDEST={}", dir.display()),
            self.makepkg.to_string_lossy().into_owned(),
        ];
        if opts.force {
            cmd.push("-f".to_string());
        }
        if opts.clean {
            cmd.push("-C".to_string());
        }
        if opts.skip_pgp_check {
            cmd.push("--skippgpcheck".to_string());
        }
        if opts.no_confirm {
            cmd.push("--noconfirm".to_string());
        }
        if !opts.keep_sources {
            cmd.push("-c".to_string());
        }
        // Dependencies are handled by the previous stage
        cmd.push("--nodeps".to_string());
        cmd
    }

    fn build_profile(&self, dir: &Path) -> IsolationProfile {
        let mut profile = IsolationProfile::build().clone();
        profile.set_network(true);
        profile.add_rw_bind(dir);
        profile.set_env("PKGDEST", dir.to_string_lossy());
        profile
    }

    /// Returns whether the build ran sandboxed
    fn run_build(&self, recipe: &BuildRecipe, dir: &Path) -> Result<bool> {
        self.notify(
            Stage::Build,
            &format!("Building {} {}", recipe.name(), recipe.full_version()),
        );
        remove_stale_archives(dir)?;
        let command = self.makepkg_command(dir);
        let cancel = &self.options.cancel;
        if self.options.verbose {
            info!("Build command: {}", command.join(" "));
        }

        if self.options.sandbox {
            if self.sandbox.available() {
                let profile = self.build_profile(dir);
                match self.sandbox.run(&profile, dir, &command, cancel) {
                    Ok(()) => return Ok(true),
                    Err(SandboxError::SetupFailed(msg)) => {
                        warn!("Sandbox setup failed ({}), building without sandbox", msg);
                    }
                    Err(e) => return Err(sandbox_error(e)),
                }
            } else {
                warn!("Sandbox unavailable, building without sandbox");
            }
        }

        self.sandbox
            .run_unsandboxed(dir, &command, cancel)
            .map_err(sandbox_error)?;
        Ok(false)
    }

    fn collect(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.notify(Stage::Collect, &format!("Collecting archives from {}", dir.display()));

        let mut artifacts: Vec<PathBuf> = archive_files(dir)?
            .into_iter()
            .filter(|path| file_name_matches(path, is_artifact))
            .collect();
        artifacts.sort();

        if artifacts.is_empty() {
            return Err(Error::NoArtifactsError(dir.to_path_buf()));
        }
        for artifact in &artifacts {
            debug!("Found archive {}", artifact.display());
        }
        Ok(artifacts)
    }

    fn install(&self, artifacts: &[PathBuf]) -> Result<()> {
        self.notify(
            Stage::Install,
            &format!("Installing {} archive(s)", artifacts.len()),
        );
        let opts = InstallOptions {
            as_deps: self.options.as_deps,
            no_confirm: self.options.no_confirm,
        };
        self.native
            .install_local(artifacts, opts, &self.options.cancel)
    }

    /// Cache directory of a package base
    ///
    /// Names come from the registry and the command line, so anything that
    /// would escape the cache root is refused.
    pub fn package_dir(&self, base: &str) -> Result<PathBuf> {
        if base.is_empty() || base == "." || base == ".." || base.contains('/') {
            return Err(Error::FetchError(format!("Invalid package base '{base}'")));
        }
        Ok(self.cache_root.join(base))
    }

    /// Delete one package's cache directory
    pub fn clean_package(&self, base: &str) -> Result<()> {
        let dir = self
            .package_dir(base)
            .map_err(|_| Error::NotCached(base.to_string()))?;
        if !dir.is_dir() {
            return Err(Error::NotCached(base.to_string()));
        }
        info!("Removing {}", dir.display());
        remove_dir(&dir).map_err(Error::IoError)
    }

    /// Delete the whole cache
    pub fn clean_all(&self) -> Result<()> {
        if !self.cache_root.exists() {
            debug!("Cache {} does not exist", self.cache_root.display());
            return Ok(());
        }
        info!("Removing {}", self.cache_root.display());
        remove_dir(&self.cache_root).map_err(Error::IoError)
    }

    /// Names of the cached package bases, sorted
    pub fn list_cached(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.cache_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read {}: {e}",
                    self.cache_root.display()
                )));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parse a cached recipe without fetching
    pub fn load_cached(&self, base: &str) -> Result<BuildRecipe> {
        let path = self
            .package_dir(base)
            .map_err(|_| Error::NotCached(base.to_string()))?
            .join(RECIPE_FILE);
        if !path.is_file() {
            return Err(Error::NotCached(base.to_string()));
        }
        self.parser.parse(&path)
    }
}

fn sandbox_error(err: SandboxError) -> Error {
    match err {
        SandboxError::Cancelled => Error::Cancelled,
        SandboxError::SetupFailed(msg) => Error::SandboxSetupError(msg),
        e @ SandboxError::CommandFailed { .. } => Error::BuildError(e.to_string()),
    }
}

fn remove_dir(dir: &Path) -> std::result::Result<(), String> {
    fs::remove_dir_all(dir).map_err(|e| format!("Failed to remove {}: {e}", dir.display()))
}
