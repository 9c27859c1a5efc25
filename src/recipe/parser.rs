// src/recipe/parser.rs

//! Recipe parsing with an ordered chain of strategies
//!
//! The high-fidelity [`ShellStrategy`] lets Bash evaluate the recipe and
//! report the resulting variables. Evaluating runs the recipe's top-level
//! code, and parsing happens before review, so evaluation only happens
//! inside the minimal sandbox profile unless host evaluation was explicitly
//! allowed. When the shell cannot run, does not finish in time or has no
//! sandbox, the [`PatternStrategy`] reads declarations straight from the
//! text. Hook detection and the dangerous-command scan always run on the
//! raw text afterwards, whichever strategy produced the fields.
//!
//! Only an unreadable file is an error; a weak parse degrades silently.

use super::pkgbuild::{extract_list, extract_variables, function_names};
use super::scanner::{self, ScanPolicy};
use super::BuildRecipe;
use crate::container::{IsolationProfile, Sandbox};
use crate::error::{Error, Result};
use crate::process::{self, CancelToken};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default upper bound on shell evaluation of a recipe
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(60);

/// `PATH` given to the evaluating shell
const EVAL_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/bin";

/// Scalar variables reported by the shell strategy
const SCALAR_FIELDS: &[&str] = &["pkgbase", "epoch", "pkgver", "pkgrel", "pkgdesc", "url", "install"];

/// Array variables reported by the shell strategy, one line per element
const ARRAY_FIELDS: &[&str] = &[
    "pkgname",
    "license",
    "arch",
    "groups",
    "depends",
    "makedepends",
    "checkdepends",
    "optdepends",
    "conflicts",
    "provides",
    "replaces",
    "source",
    "md5sums",
    "sha1sums",
    "sha256sums",
    "sha512sums",
    "options",
    "backup",
];

/// Parser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Shell used to evaluate recipes
    pub shell: PathBuf,
    /// Upper bound on shell evaluation, in seconds
    pub timeout_secs: u64,
    /// Records kept for a line that matches several scanner rules
    pub scan_policy: ScanPolicy,
    /// Evaluate recipes directly on the host when no sandbox is available
    pub allow_host_eval: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("bash"),
            timeout_secs: DEFAULT_PARSE_TIMEOUT.as_secs(),
            scan_policy: ScanPolicy::default(),
            allow_host_eval: false,
        }
    }
}

impl ParserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One way of turning recipe text into recipe fields
///
/// Returns `None` when the strategy could not produce a result, handing
/// over to the next strategy in the chain.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, path: &Path, content: &str) -> Option<BuildRecipe>;
}

/// Evaluate the recipe in a Bash subprocess and read back its variables
///
/// Runs in `sandbox` under a copy of the minimal profile when one is
/// available. Without a sandbox it only evaluates on the host if
/// [`allow_host`](Self::allow_host) was set, and otherwise gives up.
pub struct ShellStrategy {
    shell: PathBuf,
    timeout: Duration,
    sandbox: Option<Arc<dyn Sandbox>>,
    allow_host: bool,
}

impl ShellStrategy {
    pub fn new(shell: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
            sandbox: None,
            allow_host: false,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn allow_host(mut self, allow: bool) -> Self {
        self.allow_host = allow;
        self
    }

    fn script() -> String {
        let mut script = String::from(
            "set +e\nsource \"$1\" >/dev/null 2>&1 </dev/null\nset +u\n",
        );
        script.push_str(&format!(
            "for __v in {}; do __x=\"${{!__v}}\"; printf '%s=%s\\n' \"$__v\" \"${{__x//$'\\n'/ }}\"; done\n",
            SCALAR_FIELDS.join(" ")
        ));
        script.push_str(&format!(
            "for __v in {}; do __r=\"${{__v}}[@]\"; for __e in \"${{!__r}}\"; do printf '%s=%s\\n' \"$__v\" \"${{__e//$'\\n'/ }}\"; done; done\n",
            ARRAY_FIELDS.join(" ")
        ));
        script
    }

    fn evaluate(&self, path: &Path) -> Option<String> {
        if let Some(sandbox) = self.sandbox.as_deref()
            && sandbox.available()
        {
            return self.evaluate_sandboxed(sandbox, path);
        }
        if self.allow_host {
            return self.evaluate_on_host(path);
        }
        debug!(
            "No sandbox for evaluating {}, reading declarations only",
            path.display()
        );
        None
    }

    fn evaluate_sandboxed(&self, sandbox: &dyn Sandbox, path: &Path) -> Option<String> {
        let path = match fs::canonicalize(path) {
            Ok(path) => path,
            Err(e) => {
                debug!("Cannot resolve {}: {}", path.display(), e);
                return None;
            }
        };
        let workdir = path.parent()?;

        let mut profile = IsolationProfile::minimal().clone();
        profile.add_ro_bind(workdir);
        profile.set_env("PATH", EVAL_PATH);
        profile.set_env("LANG", "C");
        profile.set_env("CARCH", std::env::consts::ARCH);

        let command = vec![
            self.shell.to_string_lossy().into_owned(),
            "--noprofile".to_string(),
            "--norc".to_string(),
            "-c".to_string(),
            Self::script(),
            "pacforge-parse".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        match sandbox.capture(&profile, workdir, &command, &CancelToken::new(), Some(self.timeout)) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Sandboxed recipe evaluation failed: {}", e);
                None
            }
        }
    }

    fn evaluate_on_host(&self, path: &Path) -> Option<String> {
        let workdir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let script = Self::script();
        let mut cmd = Command::new(&self.shell);
        cmd.args(["--noprofile", "--norc", "-c", script.as_str(), "pacforge-parse"])
            .arg(path)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", EVAL_PATH)
            .env("LANG", "C")
            .env("CARCH", std::env::consts::ARCH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let program = process::program_name(&cmd);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("Cannot spawn {} for recipe evaluation: {}", program, e);
                return None;
            }
        };

        // Drain stdout on a separate thread so a chatty recipe cannot block on a full pipe
        let mut stdout = child.stdout.take()?;
        let reader = std::thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });

        let status = process::wait(&mut child, &program, &CancelToken::new(), Some(self.timeout));
        let output = reader.join().ok().and_then(|r| r.ok());

        match status {
            Ok(status) if status.success() => output,
            Ok(status) => {
                debug!("Recipe evaluation exited with {}", status);
                None
            }
            Err(e) => {
                warn!("Recipe evaluation failed: {}", e);
                None
            }
        }
    }
}

impl ParseStrategy for ShellStrategy {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn extract(&self, path: &Path, _content: &str) -> Option<BuildRecipe> {
        let output = self.evaluate(path)?;
        Some(recipe_from_shell_output(&output))
    }
}

/// Map `key=value` lines printed by the evaluation script onto a recipe
fn recipe_from_shell_output(output: &str) -> BuildRecipe {
    let mut recipe = BuildRecipe::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.to_string();
        match key {
            "pkgbase" => recipe.base = value,
            "epoch" => recipe.epoch = value,
            "pkgver" => recipe.version = value,
            "pkgrel" => recipe.release = value,
            "pkgdesc" => recipe.description = value,
            "url" => recipe.url = value,
            "install" => recipe.install = value,
            other => {
                if let Some(list) = list_field(&mut recipe, other) {
                    list.push(value);
                }
            }
        }
    }

    recipe
}

fn list_field<'a>(recipe: &'a mut BuildRecipe, key: &str) -> Option<&'a mut Vec<String>> {
    let field = match key {
        "pkgname" => &mut recipe.names,
        "license" => &mut recipe.licenses,
        "arch" => &mut recipe.arch,
        "groups" => &mut recipe.groups,
        "depends" => &mut recipe.depends,
        "makedepends" => &mut recipe.makedepends,
        "checkdepends" => &mut recipe.checkdepends,
        "optdepends" => &mut recipe.optdepends,
        "conflicts" => &mut recipe.conflicts,
        "provides" => &mut recipe.provides,
        "replaces" => &mut recipe.replaces,
        "source" => &mut recipe.sources,
        "md5sums" => &mut recipe.md5sums,
        "sha1sums" => &mut recipe.sha1sums,
        "sha256sums" => &mut recipe.sha256sums,
        "sha512sums" => &mut recipe.sha512sums,
        "options" => &mut recipe.options,
        "backup" => &mut recipe.backup,
        _ => return None,
    };
    Some(field)
}

/// Read declarations directly from the recipe text
///
/// Lower fidelity than evaluating the recipe (no expansion of `$pkgver`
/// and friends) but never fails; undeclared fields stay empty.
#[derive(Debug, Default)]
pub struct PatternStrategy;

impl ParseStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn extract(&self, _path: &Path, content: &str) -> Option<BuildRecipe> {
        let vars = extract_variables(content);
        let scalar = |name: &str| vars.get(name).cloned().unwrap_or_default();

        let mut recipe = BuildRecipe {
            base: scalar("pkgbase"),
            epoch: scalar("epoch"),
            version: scalar("pkgver"),
            release: scalar("pkgrel"),
            description: scalar("pkgdesc"),
            url: scalar("url"),
            install: scalar("install"),
            ..Default::default()
        };

        for key in ARRAY_FIELDS {
            if let Some(list) = list_field(&mut recipe, key) {
                *list = extract_list(content, &vars, key);
            }
        }

        Some(recipe)
    }
}

/// Parses recipe files through an ordered strategy chain
pub struct RecipeParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
    policy: ScanPolicy,
}

impl Default for RecipeParser {
    fn default() -> Self {
        Self::new(&ParserConfig::default())
    }
}

impl RecipeParser {
    /// Pattern extraction only, unless `config` allows host evaluation
    pub fn new(config: &ParserConfig) -> Self {
        Self::from_shell(
            ShellStrategy::new(&config.shell, config.timeout()).allow_host(config.allow_host_eval),
            config.scan_policy,
        )
    }

    /// Shell evaluation inside `sandbox` first, pattern extraction as the fallback
    pub fn sandboxed(config: &ParserConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        Self::from_shell(
            ShellStrategy::new(&config.shell, config.timeout())
                .with_sandbox(sandbox)
                .allow_host(config.allow_host_eval),
            config.scan_policy,
        )
    }

    fn from_shell(shell: ShellStrategy, policy: ScanPolicy) -> Self {
        Self::with_strategies(vec![Box::new(shell), Box::new(PatternStrategy)], policy)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>, policy: ScanPolicy) -> Self {
        Self { strategies, policy }
    }

    /// Parse a recipe file; fails only if the file cannot be read
    pub fn parse(&self, path: &Path) -> Result<BuildRecipe> {
        let content = fs::read_to_string(path).map_err(|source| Error::ParseError {
            path: path.to_path_buf(),
            source,
        })?;

        let mut recipe = self
            .strategies
            .iter()
            .find_map(|strategy| {
                let result = strategy.extract(path, &content);
                match &result {
                    Some(_) => debug!("Parsed {} with {} strategy", path.display(), strategy.name()),
                    None => debug!("{} strategy gave up on {}", strategy.name(), path.display()),
                }
                result
            })
            .unwrap_or_default();

        if recipe.base.is_empty()
            && let Some(first) = recipe.names.first()
        {
            recipe.base = first.clone();
        }

        detect_hooks(&mut recipe, &content);
        recipe.dangerous = scanner::scan_with_policy(&content, self.policy);
        recipe.raw = content;

        if !recipe.dangerous.is_empty() {
            warn!(
                "{} line(s) of {} flagged for review",
                recipe.dangerous.len(),
                path.display()
            );
        }

        Ok(recipe)
    }
}

fn detect_hooks(recipe: &mut BuildRecipe, content: &str) {
    for name in function_names(content) {
        match name.as_str() {
            "prepare" => recipe.has_prepare = true,
            "build" => recipe.has_build = true,
            "check" => recipe.has_check = true,
            "package" => recipe.has_package = true,
            n if n.starts_with("package_") => recipe.has_package = true,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BubblewrapExecutor, SandboxError};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Sandbox that records captures and answers with fixed output
    struct RecordingSandbox {
        output: std::result::Result<String, ()>,
        captures: Mutex<Vec<(IsolationProfile, PathBuf, Vec<String>)>>,
    }

    impl RecordingSandbox {
        fn new(output: std::result::Result<&str, ()>) -> Self {
            Self {
                output: output.map(str::to_string),
                captures: Mutex::new(Vec::new()),
            }
        }
    }

    impl Sandbox for RecordingSandbox {
        fn available(&self) -> bool {
            true
        }

        fn run(
            &self,
            _profile: &IsolationProfile,
            _workdir: &Path,
            _command: &[String],
            _cancel: &CancelToken,
        ) -> std::result::Result<(), SandboxError> {
            unreachable!("parsing never runs a build")
        }

        fn capture(
            &self,
            profile: &IsolationProfile,
            workdir: &Path,
            command: &[String],
            _cancel: &CancelToken,
            _timeout: Option<Duration>,
        ) -> std::result::Result<String, SandboxError> {
            self.captures.lock().unwrap().push((
                profile.clone(),
                workdir.to_path_buf(),
                command.to_vec(),
            ));
            self.output
                .clone()
                .map_err(|()| SandboxError::SetupFailed("no user namespaces".into()))
        }

        fn run_unsandboxed(
            &self,
            _workdir: &Path,
            _command: &[String],
            _cancel: &CancelToken,
        ) -> std::result::Result<(), SandboxError> {
            unreachable!("parsing never runs a build")
        }
    }

    const SIMPLE: &str = r#"
# Maintainer: Someone <someone@example.com>
pkgname=hello
pkgver=1.0
pkgrel=1
pkgdesc="Hello World"
url="https://example.com"
arch=('x86_64')
license=('GPL')
depends=('glibc')
makedepends=('gcc' 'make>=4')
source=("hello-1.0.tar.gz::https://example.com/hello-1.0.tar.gz"
        'fix.patch')
sha256sums=('abc123'
            'SKIP')

build() {
    cd "$pkgname-$pkgver"
    ./configure --prefix=/usr
    make
}

package() {
    cd "$pkgname-$pkgver"
    make DESTDIR="$pkgdir" install
}
"#;

    fn write_recipe(content: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PKGBUILD");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn pattern_only() -> RecipeParser {
        RecipeParser::with_strategies(vec![Box::new(PatternStrategy)], ScanPolicy::PerRule)
    }

    #[test]
    fn test_pattern_strategy() {
        let (_dir, path) = write_recipe(SIMPLE);
        let recipe = pattern_only().parse(&path).unwrap();

        assert_eq!(recipe.names, vec!["hello"]);
        assert_eq!(recipe.base, "hello");
        assert_eq!(recipe.full_version(), "1.0-1");
        assert_eq!(recipe.description, "Hello World");
        assert_eq!(recipe.depends, vec!["glibc"]);
        assert_eq!(recipe.makedepends, vec!["gcc", "make>=4"]);
        assert_eq!(recipe.sha256sums, vec!["abc123", "SKIP"]);
        assert_eq!(recipe.source_urls(), vec!["https://example.com/hello-1.0.tar.gz"]);
        assert!(recipe.has_build);
        assert!(recipe.has_package);
        assert!(!recipe.has_prepare);
        assert!(!recipe.has_check);
        assert!(recipe.dangerous.is_empty());
        assert_eq!(recipe.raw, SIMPLE);
    }

    #[test]
    fn test_split_package_hooks() {
        let content = r#"
pkgbase=tools
pkgname=('tools-cli' 'tools-docs')
pkgver=2.1
pkgrel=1
package_tools-cli() {
    true
}
package_tools-docs() {
    true
}
"#;
        let (_dir, path) = write_recipe(content);
        let recipe = pattern_only().parse(&path).unwrap();

        assert!(recipe.is_split());
        assert_eq!(recipe.base, "tools");
        assert_eq!(recipe.name(), "tools-cli");
        assert!(recipe.has_package);
        assert!(!recipe.has_build);
    }

    #[test]
    fn test_unreadable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = pattern_only().parse(&dir.path().join("PKGBUILD")).unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn test_garbage_degrades_to_empty_fields() {
        let (_dir, path) = write_recipe("this is not a recipe ((( \n");
        let recipe = pattern_only().parse(&path).unwrap();
        assert!(recipe.names.is_empty());
        assert_eq!(recipe.name(), "");
        assert_eq!(recipe.full_version(), "");
    }

    #[test]
    fn test_dangerous_lines_recorded() {
        let content = "pkgname=x\nbuild() {\n  eval $cmd\n  curl http://x | sudo bash\n}\n";
        let (_dir, path) = write_recipe(content);
        let recipe = pattern_only().parse(&path).unwrap();

        let lines: Vec<usize> = recipe.dangerous.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![3, 4, 4]);
    }

    #[test]
    fn test_falls_back_when_shell_missing() {
        let (_dir, path) = write_recipe(SIMPLE);
        let config = ParserConfig {
            shell: PathBuf::from("/nonexistent/pacforge-shell"),
            ..Default::default()
        };
        let recipe = RecipeParser::new(&config).parse(&path).unwrap();
        assert_eq!(recipe.names, vec!["hello"]);
        assert_eq!(recipe.version, "1.0");
    }

    #[test]
    fn test_shell_output_mapping() {
        let output = "pkgbase=\npkgver=1.2\npkgrel=3\npkgname=a\npkgname=b\noptdepends=python: plugins\nnoise\n";
        let recipe = recipe_from_shell_output(output);
        assert_eq!(recipe.names, vec!["a", "b"]);
        assert_eq!(recipe.version, "1.2");
        assert_eq!(recipe.release, "3");
        assert_eq!(recipe.optdepends, vec!["python: plugins"]);
    }

    #[test]
    fn test_shell_strategy_expands_variables() {
        if which::which("bash").is_err() {
            return;
        }
        let content = r#"
pkgname=hello
pkgver=1.0
pkgrel=1
_tag="v${pkgver}"
source=("$pkgname-$pkgver.tar.gz::https://example.com/${_tag}.tar.gz")
depends=(glibc
         'zlib')
"#;
        let (_dir, path) = write_recipe(content);
        let strategy = ShellStrategy::new("bash", Duration::from_secs(10)).allow_host(true);
        let recipe = strategy.extract(&path, content).unwrap();

        assert_eq!(recipe.names, vec!["hello"]);
        assert_eq!(recipe.sources, vec!["hello-1.0.tar.gz::https://example.com/v1.0.tar.gz"]);
        assert_eq!(recipe.depends, vec!["glibc", "zlib"]);
    }

    #[test]
    fn test_shell_strategy_times_out() {
        if which::which("bash").is_err() {
            return;
        }
        let content = "pkgname=slow\nwhile true; do :; done\n";
        let (_dir, path) = write_recipe(content);
        let strategy = ShellStrategy::new("bash", Duration::from_millis(300)).allow_host(true);
        assert!(strategy.extract(&path, content).is_none());
    }

    #[test]
    fn test_top_level_code_not_run_without_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("evaluated");
        let content = format!("pkgname=evil\npkgver=1\npkgrel=1\ntouch '{}'\n", marker.display());
        let path = dir.path().join("PKGBUILD");
        fs::write(&path, &content).unwrap();

        let recipe = RecipeParser::new(&ParserConfig::default()).parse(&path).unwrap();
        assert_eq!(recipe.names, vec!["evil"]);
        assert!(!marker.exists());

        let missing: Arc<dyn Sandbox> =
            Arc::new(BubblewrapExecutor::new("/nonexistent/pacforge-bwrap"));
        let recipe = RecipeParser::sandboxed(&ParserConfig::default(), missing)
            .parse(&path)
            .unwrap();
        assert_eq!(recipe.names, vec!["evil"]);
        assert_eq!(recipe.version, "1");
        assert!(!marker.exists());
    }

    #[test]
    fn test_evaluation_uses_minimal_profile() {
        let (dir, path) = write_recipe(SIMPLE);
        let sandbox = Arc::new(RecordingSandbox::new(Ok("pkgname=fromsandbox\npkgver=2.0\n")));
        let parser = RecipeParser::sandboxed(&ParserConfig::default(), sandbox.clone());

        let recipe = parser.parse(&path).unwrap();
        assert_eq!(recipe.names, vec!["fromsandbox"]);
        assert_eq!(recipe.version, "2.0");

        let captures = sandbox.captures.lock().unwrap();
        assert_eq!(captures.len(), 1);
        let (profile, workdir, command) = &captures[0];
        let recipe_dir = fs::canonicalize(dir.path()).unwrap();

        assert_eq!(profile.name, "minimal");
        assert!(!profile.network_allowed());
        assert!(profile.rw_binds.is_empty());
        assert!(profile.ro_binds.contains(&recipe_dir));
        assert_eq!(workdir, &recipe_dir);
        assert_eq!(command[0], "bash");
        assert_eq!(command.last().unwrap(), &recipe_dir.join("PKGBUILD").display().to_string());
    }

    #[test]
    fn test_failed_sandbox_evaluation_falls_back() {
        let (_dir, path) = write_recipe(SIMPLE);
        let sandbox = Arc::new(RecordingSandbox::new(Err(())));
        let parser = RecipeParser::sandboxed(&ParserConfig::default(), sandbox.clone());

        let recipe = parser.parse(&path).unwrap();
        assert_eq!(recipe.names, vec!["hello"]);
        assert_eq!(recipe.version, "1.0");
        assert_eq!(sandbox.captures.lock().unwrap().len(), 1);
    }
}
