// tests/common/mod.rs

//! Shared mock collaborators for integration tests.

#![allow(dead_code)]

use pacforge::container::{IsolationProfile, Sandbox, SandboxError};
use pacforge::review::{ReviewGate, Verdict};
use pacforge::{
    BuildOptions, BuildRecipe, Builder, CancelToken, Error, InstallOptions, NativePackageManager,
    PackageInfo, Registry, Result, Vcs,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Recipe used by the end-to-end scenario
pub const MYPKG_RECIPE: &str = r#"# Maintainer: Someone <someone@example.com>
pkgname=mypkg
pkgver=1.0
pkgrel=1
pkgdesc="A package for tests"
arch=('x86_64')
depends=('glibc')
source=("mypkg-1.0.tar.gz::https://example.com/mypkg-1.0.tar.gz")
sha256sums=('SKIP')

build() {
  eval $cmd
}

package() {
  install -Dm755 mypkg "$pkgdir/usr/bin/mypkg"
}
"#;

pub const MYPKG_ARTIFACT: &str = "mypkg-1.0-1-x86_64.pkg.tar.zst";

/// Registry record for `name`
pub fn package_info(name: &str) -> PackageInfo {
    PackageInfo {
        name: name.to_string(),
        package_base: name.to_string(),
        version: "1.0-1".to_string(),
        description: Some("A package for tests".to_string()),
        url: None,
        git_clone_url: format!("https://aur.example.com/{name}.git"),
        maintainer: Some("someone".to_string()),
        votes: 10,
        popularity: 1.5,
        last_modified: 1_700_000_000,
        out_of_date: None,
    }
}

/// Registry with a fixed set of packages
#[derive(Default)]
pub struct MockRegistry {
    packages: HashMap<String, PackageInfo>,
    pub lookups: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn with(names: &[&str]) -> Self {
        Self {
            packages: names
                .iter()
                .map(|n| (n.to_string(), package_info(n)))
                .collect(),
            lookups: Mutex::new(Vec::new()),
        }
    }
}

impl Registry for MockRegistry {
    fn package(&self, name: &str) -> Result<Option<PackageInfo>> {
        self.lookups.lock().unwrap().push(name.to_string());
        Ok(self.packages.get(name).cloned())
    }
}

/// Version control that "clones" by writing a recipe into the destination
pub struct MockVcs {
    /// Recipe written on clone; `None` leaves the checkout without one
    recipe: Option<String>,
    pub fail_update: bool,
    pub clones: Mutex<Vec<(String, PathBuf)>>,
    pub updates: Mutex<Vec<PathBuf>>,
}

impl MockVcs {
    pub fn new(recipe: &str) -> Self {
        Self {
            recipe: Some(recipe.to_string()),
            fail_update: false,
            clones: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn without_recipe() -> Self {
        Self {
            recipe: None,
            ..Self::new("")
        }
    }

    pub fn clone_count(&self) -> usize {
        self.clones.lock().unwrap().len()
    }
}

impl Vcs for MockVcs {
    fn clone_repo(&self, url: &str, dest: &Path, _cancel: &CancelToken) -> Result<()> {
        self.clones
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        if dest.exists() {
            return Err(Error::FetchError(format!("{} already exists", dest.display())));
        }
        fs::create_dir_all(dest.join(".git"))?;
        if let Some(recipe) = &self.recipe {
            fs::write(dest.join("PKGBUILD"), recipe)?;
        }
        Ok(())
    }

    fn update(&self, dir: &Path, _cancel: &CancelToken) -> Result<()> {
        self.updates.lock().unwrap().push(dir.to_path_buf());
        if self.fail_update {
            return Err(Error::FetchError("cannot rebase".to_string()));
        }
        Ok(())
    }
}

/// Package database with a fixed installed set
#[derive(Default)]
pub struct MockNative {
    installed: HashSet<String>,
    pub fail_install: bool,
    pub probes: Mutex<Vec<String>>,
    pub installs: Mutex<Vec<(Vec<String>, InstallOptions)>>,
    pub local_installs: Mutex<Vec<(Vec<PathBuf>, InstallOptions)>>,
}

impl MockNative {
    pub fn with(installed: &[&str]) -> Self {
        Self {
            installed: installed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

impl NativePackageManager for MockNative {
    fn is_installed(&self, name: &str, _cancel: &CancelToken) -> Result<bool> {
        self.probes.lock().unwrap().push(name.to_string());
        Ok(self.installed.contains(name))
    }

    fn install(&self, names: &[String], opts: InstallOptions, _cancel: &CancelToken) -> Result<()> {
        self.installs.lock().unwrap().push((names.to_vec(), opts));
        if self.fail_install {
            return Err(Error::DependencyError("target not found".to_string()));
        }
        Ok(())
    }

    fn install_local(
        &self,
        paths: &[PathBuf],
        opts: InstallOptions,
        _cancel: &CancelToken,
    ) -> Result<()> {
        self.local_installs
            .lock()
            .unwrap()
            .push((paths.to_vec(), opts));
        Ok(())
    }
}

/// Scripted result of one sandbox call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Ok,
    SetupFailed,
    CommandFailed(i32),
    Cancelled,
}

impl RunResult {
    fn into_result(self) -> std::result::Result<(), SandboxError> {
        match self {
            RunResult::Ok => Ok(()),
            RunResult::SetupFailed => Err(SandboxError::SetupFailed("no user namespaces".into())),
            RunResult::CommandFailed(code) => Err(SandboxError::CommandFailed {
                program: "makepkg".into(),
                code: Some(code),
            }),
            RunResult::Cancelled => Err(SandboxError::Cancelled),
        }
    }
}

/// One recorded sandbox call
#[derive(Debug, Clone)]
pub struct SandboxCall {
    pub sandboxed: bool,
    pub profile: Option<IsolationProfile>,
    pub workdir: PathBuf,
    pub command: Vec<String>,
}

/// Sandbox that plays back scripted results and writes artifacts on success
///
/// Output captures (recipe evaluation) are recorded separately from runs and
/// always fail with a setup error, so recipes are read by pattern extraction.
pub struct MockSandbox {
    available: bool,
    sandboxed: Mutex<VecDeque<RunResult>>,
    unsandboxed: Mutex<VecDeque<RunResult>>,
    /// Files created in the work dir by a successful run
    artifacts: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<SandboxCall>>,
    pub captures: Mutex<Vec<SandboxCall>>,
}

impl MockSandbox {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            sandboxed: Mutex::new(VecDeque::new()),
            unsandboxed: Mutex::new(VecDeque::new()),
            artifacts: Mutex::new(vec![MYPKG_ARTIFACT.to_string()]),
            calls: Mutex::new(Vec::new()),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn sandboxed_results(self, results: &[RunResult]) -> Self {
        *self.sandboxed.lock().unwrap() = results.iter().copied().collect();
        self
    }

    pub fn unsandboxed_results(self, results: &[RunResult]) -> Self {
        *self.unsandboxed.lock().unwrap() = results.iter().copied().collect();
        self
    }

    pub fn producing(self, artifacts: &[&str]) -> Self {
        self.set_producing(artifacts);
        self
    }

    /// Change the files later successful runs create
    pub fn set_producing(&self, artifacts: &[&str]) {
        *self.artifacts.lock().unwrap() = artifacts.iter().map(|s| s.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn captures(&self) -> Vec<SandboxCall> {
        self.captures.lock().unwrap().clone()
    }

    fn finish(&self, result: RunResult, workdir: &Path) -> std::result::Result<(), SandboxError> {
        if result == RunResult::Ok {
            for name in self.artifacts.lock().unwrap().iter() {
                fs::write(workdir.join(name), b"archive").unwrap();
            }
        }
        result.into_result()
    }
}

impl Sandbox for MockSandbox {
    fn available(&self) -> bool {
        self.available
    }

    fn run(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        _cancel: &CancelToken,
    ) -> std::result::Result<(), SandboxError> {
        self.calls.lock().unwrap().push(SandboxCall {
            sandboxed: true,
            profile: Some(profile.clone()),
            workdir: workdir.to_path_buf(),
            command: command.to_vec(),
        });
        let result = self
            .sandboxed
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunResult::Ok);
        self.finish(result, workdir)
    }

    fn capture(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        _cancel: &CancelToken,
        _timeout: Option<Duration>,
    ) -> std::result::Result<String, SandboxError> {
        self.captures.lock().unwrap().push(SandboxCall {
            sandboxed: true,
            profile: Some(profile.clone()),
            workdir: workdir.to_path_buf(),
            command: command.to_vec(),
        });
        Err(SandboxError::SetupFailed("no user namespaces".into()))
    }

    fn run_unsandboxed(
        &self,
        workdir: &Path,
        command: &[String],
        _cancel: &CancelToken,
    ) -> std::result::Result<(), SandboxError> {
        self.calls.lock().unwrap().push(SandboxCall {
            sandboxed: false,
            profile: None,
            workdir: workdir.to_path_buf(),
            command: command.to_vec(),
        });
        let result = self
            .unsandboxed
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunResult::Ok);
        self.finish(result, workdir)
    }
}

/// Review gate with a fixed verdict that counts its calls
pub struct MockReviewer {
    verdict: Verdict,
    pub calls: AtomicUsize,
}

impl MockReviewer {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReviewGate for MockReviewer {
    fn review(&self, _recipe: &BuildRecipe, _info: &PackageInfo) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

/// A builder over a scratch cache plus handles to its collaborators
pub struct Harness {
    pub cache: TempDir,
    pub registry: Arc<MockRegistry>,
    pub vcs: Arc<MockVcs>,
    pub native: Arc<MockNative>,
    pub sandbox: Arc<MockSandbox>,
}

impl Harness {
    pub fn new(registry: MockRegistry, vcs: MockVcs, native: MockNative, sandbox: MockSandbox) -> Self {
        Self {
            cache: tempfile::tempdir().unwrap(),
            registry: Arc::new(registry),
            vcs: Arc::new(vcs),
            native: Arc::new(native),
            sandbox: Arc::new(sandbox),
        }
    }

    /// The end-to-end setup: mypkg in the registry, glibc installed
    pub fn mypkg(sandbox: MockSandbox) -> Self {
        Self::new(
            MockRegistry::with(&["mypkg"]),
            MockVcs::new(MYPKG_RECIPE),
            MockNative::with(&["glibc"]),
            sandbox,
        )
    }

    pub fn builder(&self, options: BuildOptions) -> Builder {
        Builder::new(
            self.cache.path(),
            self.registry.clone(),
            self.vcs.clone(),
            self.native.clone(),
            self.sandbox.clone(),
        )
        .with_options(options)
    }

    pub fn package_dir(&self, base: &str) -> PathBuf {
        self.cache.path().join(base)
    }
}

/// Options for unattended tests: no review prompt, defaults otherwise
pub fn unattended() -> BuildOptions {
    BuildOptions {
        review: false,
        ..Default::default()
    }
}
