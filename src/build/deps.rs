// src/build/deps.rs

//! Dependency resolution for recipe builds
//!
//! Runtime, build and check dependencies are probed against the host
//! package database by bare name; whatever is missing is installed from the
//! sync repositories and marked as a dependency.

use crate::error::Result;
use crate::packages::{InstallOptions, NativePackageManager};
use crate::process::CancelToken;
use crate::recipe::BuildRecipe;
use tracing::{debug, info};

/// Package name with any version constraint removed
///
/// `foo>=1.0`, `foo<2`, `foo=1.0-1` all give `foo`.
pub fn bare_name(dep: &str) -> &str {
    match dep.find(['<', '>', '=']) {
        Some(idx) => dep[..idx].trim(),
        None => dep.trim(),
    }
}

/// Result of dependency resolution
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyResult {
    /// Dependencies that were already satisfied
    pub already_installed: Vec<String>,
    /// Dependencies installed for this build, as declared in the recipe
    pub newly_installed: Vec<String>,
}

/// Installs what a recipe needs before it can be built
pub struct DependencyResolver<'a> {
    native: &'a dyn NativePackageManager,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(native: &'a dyn NativePackageManager) -> Self {
        Self { native }
    }

    /// Declared dependencies whose bare names are not installed
    ///
    /// The returned strings keep their version constraints.
    pub fn check_missing(&self, deps: &[String], cancel: &CancelToken) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for dep in deps {
            let name = bare_name(dep);
            if name.is_empty() {
                continue;
            }
            if self.native.is_installed(name, cancel)? {
                debug!("Dependency {} satisfied", dep);
            } else {
                missing.push(dep.clone());
            }
        }
        Ok(missing)
    }

    /// Probe and install every missing dependency of `recipe`
    pub fn resolve(
        &self,
        recipe: &BuildRecipe,
        no_confirm: bool,
        cancel: &CancelToken,
    ) -> Result<DependencyResult> {
        let deps = recipe.all_depends();
        let missing = self.check_missing(&deps, cancel)?;

        let already_installed = deps
            .iter()
            .filter(|d| !missing.contains(d))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!("All {} dependencies of {} satisfied", deps.len(), recipe.name());
            return Ok(DependencyResult {
                already_installed,
                newly_installed: Vec::new(),
            });
        }

        info!(
            "Installing {} missing dependencies for {}: {}",
            missing.len(),
            recipe.name(),
            missing.join(", ")
        );
        let opts = InstallOptions {
            as_deps: true,
            no_confirm,
        };
        self.native.install(&missing, opts, cancel)?;

        Ok(DependencyResult {
            already_installed,
            newly_installed: missing,
        })
    }
}
