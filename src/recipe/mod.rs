// src/recipe/mod.rs

//! Community build recipes (PKGBUILDs)
//!
//! A recipe is a shell script that declares package metadata through
//! well-known variables and describes the build through lifecycle functions:
//!
//! ```bash
//! pkgname=nano
//! pkgver=8.5
//! pkgrel=2
//! pkgdesc="A small and friendly text editor"
//! depends=('ncurses')
//! source=("https://nano-editor.org/dist/v8/nano-$pkgver.tar.xz")
//!
//! build() {
//!     cd "$pkgname-$pkgver"
//!     ./configure --prefix=/usr
//!     make
//! }
//!
//! package() {
//!     cd "$pkgname-$pkgver"
//!     make DESTDIR="$pkgdir" install
//! }
//! ```
//!
//! Recipes are untrusted input. [`RecipeParser`] extracts the metadata into a
//! [`BuildRecipe`] and [`scanner`] flags lines that deserve a closer look
//! during review.

pub mod parser;
mod pkgbuild;
pub mod scanner;

pub use parser::{ParseStrategy, ParserConfig, PatternStrategy, RecipeParser, ShellStrategy};
pub use scanner::{DangerousCommand, ScanPolicy};

/// Name of the recipe file at the root of a package's repository
pub const RECIPE_FILE: &str = "PKGBUILD";

/// URL scheme prefixes accepted as remote sources
const REMOTE_SCHEMES: &[&str] = &["http://", "https://", "ftp://"];

/// Version-control prefixes accepted as remote sources
const VCS_PREFIXES: &[&str] = &["git+", "git://", "svn+", "hg+", "bzr+", "fossil+"];

/// A parsed build recipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildRecipe {
    /// Declared package names (more than one for split packages)
    pub names: Vec<String>,
    /// Package family name the recipe is stored under
    pub base: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub description: String,
    pub url: String,
    pub licenses: Vec<String>,
    pub arch: Vec<String>,
    pub groups: Vec<String>,
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub optdepends: Vec<String>,
    pub conflicts: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    /// Source entries, either `destfile::url`, a bare URL/VCS reference, or a local file
    pub sources: Vec<String>,
    pub md5sums: Vec<String>,
    pub sha1sums: Vec<String>,
    pub sha256sums: Vec<String>,
    pub sha512sums: Vec<String>,
    pub options: Vec<String>,
    pub backup: Vec<String>,
    /// Install script reference
    pub install: String,
    pub has_prepare: bool,
    pub has_build: bool,
    pub has_check: bool,
    /// Set by `package()` or any split-package `package_<name>()`
    pub has_package: bool,
    /// Raw recipe text
    pub raw: String,
    /// Lines flagged by the dangerous-command scan, in line order
    pub dangerous: Vec<DangerousCommand>,
}

impl BuildRecipe {
    /// Primary package name: the first declared name, or the base name
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.base)
    }

    /// `[epoch:]version[-release]`
    pub fn full_version(&self) -> String {
        let mut v = String::new();
        if !self.epoch.is_empty() {
            v.push_str(&self.epoch);
            v.push(':');
        }
        v.push_str(&self.version);
        if !self.release.is_empty() {
            v.push('-');
            v.push_str(&self.release);
        }
        v
    }

    /// Whether the recipe produces more than one package
    pub fn is_split(&self) -> bool {
        self.names.len() > 1
    }

    /// Build-time dependencies (makedepends and checkdepends)
    pub fn build_depends(&self) -> Vec<String> {
        dedup(self.makedepends.iter().chain(&self.checkdepends))
    }

    /// Everything needed to build and run: depends, makedepends, checkdepends
    pub fn all_depends(&self) -> Vec<String> {
        dedup(
            self.depends
                .iter()
                .chain(&self.makedepends)
                .chain(&self.checkdepends),
        )
    }

    /// Optional dependency names with their `: description` suffix removed
    pub fn optdepends_names(&self) -> Vec<String> {
        self.optdepends
            .iter()
            .map(|entry| match entry.split_once(':') {
                Some((name, _)) => name.trim().to_string(),
                None => entry.trim().to_string(),
            })
            .collect()
    }

    /// Remote source URLs with any `destfile::` prefix removed
    ///
    /// Local files (patches, install scripts shipped in the repository) are
    /// not included.
    pub fn source_urls(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| match s.split_once("::") {
                Some((_, url)) => url,
                None => s.as_str(),
            })
            .filter(|url| is_remote_source(url))
            .map(str::to_string)
            .collect()
    }

    /// Names of the lifecycle hooks the recipe defines, in execution order
    pub fn hooks(&self) -> Vec<&'static str> {
        [
            (self.has_prepare, "prepare"),
            (self.has_build, "build"),
            (self.has_check, "check"),
            (self.has_package, "package"),
        ]
        .into_iter()
        .filter_map(|(present, name)| present.then_some(name))
        .collect()
    }

    pub fn has_dangerous_commands(&self) -> bool {
        !self.dangerous.is_empty()
    }
}

fn is_remote_source(url: &str) -> bool {
    REMOTE_SCHEMES
        .iter()
        .chain(VCS_PREFIXES)
        .any(|prefix| url.starts_with(prefix))
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
