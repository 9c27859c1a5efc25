// src/container/bubblewrap.rs

//! Sandboxed command execution through bubblewrap
//!
//! The executor turns an [`IsolationProfile`] into `bwrap` arguments and runs
//! the build command under it. Two failure classes are kept apart because the
//! build pipeline treats them differently:
//!
//! - [`SandboxError::SetupFailed`]: `bwrap` could not start or could not set
//!   up namespaces and mounts. The command never ran.
//! - [`SandboxError::CommandFailed`]: the sandbox was up and the wrapped
//!   command exited non-zero.
//!
//! `bwrap --json-status-fd` reports the wrapped child's pid right after
//! `clone()`, before mounts and `--chdir` are set up, so a pid report alone
//! does not prove the command started. The command is therefore wrapped in a
//! small shell that writes a marker to an inherited pipe and then `exec`s it;
//! a failure without that marker is a setup failure.

use super::IsolationProfile;
use crate::process::{self, CancelToken, ProcessError};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on the availability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shell that reports the start marker inside the sandbox
const WRAPPER_SHELL: &str = "/bin/sh";

/// What the wrapper writes once the sandbox is fully set up
const STARTED_MARKER: &[u8] = b"started";

#[derive(Error, Debug)]
pub enum SandboxError {
    /// The launcher could not start or could not establish isolation
    #[error("sandbox setup failed: {0}")]
    SetupFailed(String),

    /// The wrapped command ran and failed
    #[error("{program} failed ({})", describe_exit(.code))]
    CommandFailed { program: String, code: Option<i32> },

    #[error("cancelled")]
    Cancelled,
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated or not started".to_string(),
    }
}

/// Runs commands with or without isolation
pub trait Sandbox: Send + Sync {
    /// Whether sandboxed execution can be used on this host
    fn available(&self) -> bool;

    /// Run `command` in `workdir` under `profile`
    fn run(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
    ) -> Result<(), SandboxError>;

    /// Run `command` under `profile` and return what it wrote to stdout
    ///
    /// Stdin and stderr are discarded. `timeout` bounds the whole run.
    fn capture(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<String, SandboxError>;

    /// Run `command` in `workdir` directly on the host
    fn run_unsandboxed(
        &self,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
    ) -> Result<(), SandboxError>;
}

/// Sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Build inside the sandbox when it is available
    pub enabled: bool,
    /// Launcher binary, looked up in `PATH` when relative
    pub launcher: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            launcher: PathBuf::from("bwrap"),
        }
    }
}

/// [`Sandbox`] backed by the `bwrap` launcher
pub struct BubblewrapExecutor {
    launcher: PathBuf,
    probed: OnceLock<bool>,
}

impl BubblewrapExecutor {
    pub fn new(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            probed: OnceLock::new(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(&config.launcher)
    }

    fn probe(&self) -> bool {
        let path = match which::which(&self.launcher) {
            Ok(path) => path,
            Err(e) => {
                debug!("Sandbox launcher {} not found: {}", self.launcher.display(), e);
                return false;
            }
        };

        // Also checks that the launcher understands --json-status-fd
        let mut cmd = Command::new(&path);
        cmd.args(["--ro-bind", "/", "/", "--json-status-fd", "1", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match process::run(&mut cmd, &CancelToken::new(), Some(PROBE_TIMEOUT)) {
            Ok(status) if status.success() => {
                debug!("Sandbox launcher {} is usable", path.display());
                true
            }
            Ok(status) => {
                info!("Sandbox launcher probe exited with {}", status);
                false
            }
            Err(e) => {
                info!("Sandbox launcher probe failed: {}", e);
                false
            }
        }
    }

    /// Spawn the launcher and classify how it ended
    ///
    /// With `capture` set, stdout is collected and returned; otherwise it is
    /// inherited and the returned string is empty.
    fn launch(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
        timeout: Option<Duration>,
        capture: bool,
    ) -> Result<String, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        let (status_read, status_write) = nix::unistd::pipe()
            .map_err(|e| SandboxError::SetupFailed(format!("status pipe: {}", e)))?;
        let (started_read, started_write) = nix::unistd::pipe()
            .map_err(|e| SandboxError::SetupFailed(format!("marker pipe: {}", e)))?;

        let marker_fd = marker_fd(status_write.as_raw_fd());
        let wrapped = started_wrapper(marker_fd, command);

        let mut cmd = Command::new(&self.launcher);
        cmd.args(launcher_args(
            profile,
            workdir,
            &wrapped,
            Some(status_write.as_raw_fd()),
        ));
        inherit_as(&mut cmd, started_write.as_raw_fd(), marker_fd);
        if capture {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null());
        }

        let program = process::program_name(&cmd);
        let (result, output) = match cmd.spawn() {
            Ok(mut child) => {
                // Drain on a separate thread so a chatty command cannot block on a full pipe
                let reader = child.stdout.take().map(|mut stdout| {
                    thread::spawn(move || {
                        let mut out = String::new();
                        stdout.read_to_string(&mut out).map(|_| out)
                    })
                });
                let result = process::wait(&mut child, &program, cancel, timeout);
                let output = reader
                    .and_then(|handle| handle.join().ok())
                    .and_then(|read| read.ok());
                (result, output)
            }
            Err(source) => (Err(ProcessError::Spawn { program, source }), None),
        };

        drop(status_write);
        drop(started_write);
        let mut report = StatusReport::parse(&drain(status_read));
        report.command_started = drain(started_read).starts_with(STARTED_MARKER);
        debug!("Sandbox status: {:?}", report);

        match result {
            Ok(status) => classify(&self.launcher, command, status.code(), &report)
                .map(|()| output.unwrap_or_default()),
            Err(ProcessError::Cancelled { .. }) => Err(SandboxError::Cancelled),
            Err(e @ ProcessError::Spawn { .. }) => Err(SandboxError::SetupFailed(e.to_string())),
            Err(e) if report.command_started => {
                debug!("{}", e);
                Err(SandboxError::CommandFailed {
                    program: program_of(command),
                    code: None,
                })
            }
            Err(e) => Err(SandboxError::SetupFailed(e.to_string())),
        }
    }
}

impl Sandbox for BubblewrapExecutor {
    fn available(&self) -> bool {
        *self.probed.get_or_init(|| self.probe())
    }

    fn run(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
    ) -> Result<(), SandboxError> {
        info!("Running {:?} in {} sandbox", command, profile.name);
        self.launch(profile, workdir, command, cancel, None, false)
            .map(|_| ())
    }

    fn capture(
        &self,
        profile: &IsolationProfile,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<String, SandboxError> {
        debug!("Capturing {:?} in {} sandbox", command, profile.name);
        self.launch(profile, workdir, command, cancel, timeout, true)
    }

    fn run_unsandboxed(
        &self,
        workdir: &Path,
        command: &[String],
        cancel: &CancelToken,
    ) -> Result<(), SandboxError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SandboxError::CommandFailed {
                program: String::new(),
                code: None,
            });
        };

        warn!("Running {:?} without sandbox", command);
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);

        match process::run(&mut cmd, cancel, None) {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(SandboxError::CommandFailed {
                program: program.clone(),
                code: status.code(),
            }),
            Err(ProcessError::Cancelled { .. }) => Err(SandboxError::Cancelled),
            Err(e) => {
                debug!("{}", e);
                Err(SandboxError::CommandFailed {
                    program: program.clone(),
                    code: None,
                })
            }
        }
    }
}

/// Translate a profile into launcher arguments
///
/// Mount order matters to bwrap: later mounts are placed on top of earlier
/// ones, so tmpfs mounts come first and binds below them stay visible.
pub fn launcher_args(
    profile: &IsolationProfile,
    workdir: &Path,
    command: &[String],
    status_fd: Option<RawFd>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |parts: &[&dyn AsRef<std::ffi::OsStr>]| {
        args.extend(parts.iter().map(|p| p.as_ref().to_os_string()));
    };

    for path in &profile.tmpfs {
        push(&[&"--tmpfs", path]);
    }
    for path in &profile.ro_binds {
        push(&[&"--ro-bind-try", path, path]);
    }
    for path in &profile.dev_binds {
        push(&[&"--dev-bind-try", path, path]);
    }
    for (link, target) in &profile.symlinks {
        push(&[&"--symlink", target, link]);
    }
    for path in &profile.rw_binds {
        push(&[&"--bind", path, path]);
    }

    let ns = &profile.namespaces;
    if ns.user {
        push(&[&"--unshare-user"]);
    }
    if ns.pid {
        push(&[&"--unshare-pid", &"--proc", &"/proc"]);
    }
    if ns.network {
        push(&[&"--unshare-net"]);
    }
    if ns.ipc {
        push(&[&"--unshare-ipc"]);
    }
    if ns.cgroup {
        push(&[&"--unshare-cgroup-try"]);
    }
    if let Some(ids) = profile.id_map {
        push(&[&"--uid", &ids.uid.to_string(), &"--gid", &ids.gid.to_string()]);
    }

    if profile.die_with_parent {
        push(&[&"--die-with-parent"]);
    }
    if profile.new_session {
        push(&[&"--new-session"]);
    }

    if profile.env.clear {
        push(&[&"--clearenv"]);
        for name in &profile.env.pass {
            if let Some(value) = std::env::var_os(name) {
                push(&[&"--setenv", name, &value]);
            }
        }
    }
    if let Some(vars) = &profile.env.set {
        for (key, value) in vars {
            push(&[&"--setenv", key, value]);
        }
    }

    for cap in &profile.cap_drop {
        push(&[&"--cap-drop", cap]);
    }

    push(&[&"--chdir", &workdir]);
    if let Some(fd) = status_fd {
        push(&[&"--json-status-fd", &fd.to_string()]);
    }

    args.push("--".into());
    args.extend(command.iter().map(OsString::from));
    args
}

/// What the launcher and the start wrapper reported
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub child_pid: Option<i64>,
    pub exit_code: Option<i32>,
    /// The wrapper ran inside the finished sandbox and exec'd the command
    pub command_started: bool,
}

impl StatusReport {
    /// Parse the stream of JSON objects bwrap writes to the status fd
    pub fn parse(data: &[u8]) -> Self {
        let mut report = StatusReport::default();
        let stream = serde_json::Deserializer::from_slice(data).into_iter::<serde_json::Value>();

        for value in stream {
            let Ok(value) = value else {
                break;
            };
            if let Some(pid) = value.get("child-pid").and_then(|v| v.as_i64()) {
                report.child_pid = Some(pid);
            }
            if let Some(code) = value.get("exit-code").and_then(|v| v.as_i64()) {
                report.exit_code = i32::try_from(code).ok();
            }
        }

        report
    }
}

/// Read whatever is buffered in a pipe without waiting for writers
fn drain(read_end: OwnedFd) -> Vec<u8> {
    let mut data = Vec::new();
    // A grandchild may still hold the write end; never block on it
    if let Err(e) = fcntl(read_end.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)) {
        debug!("Failed to make pipe non-blocking: {}", e);
        return data;
    }
    if let Err(e) = File::from(read_end).read_to_end(&mut data) {
        debug!("Pipe read stopped early: {}", e);
    }
    data
}

/// Descriptor number the wrapper writes its marker to
///
/// Single digit so any POSIX shell accepts the redirection, and never the
/// launcher's status descriptor.
fn marker_fd(status_fd: RawFd) -> RawFd {
    if status_fd == 9 { 8 } else { 9 }
}

/// `command` behind a shell that reports on `fd` and then execs it
pub fn started_wrapper(fd: RawFd, command: &[String]) -> Vec<String> {
    let script = format!("printf started >&{fd}; exec {fd}>&-; exec \"$@\"");
    let mut wrapped = vec![
        WRAPPER_SHELL.to_string(),
        "-c".to_string(),
        script,
        "sh".to_string(),
    ];
    wrapped.extend(command.iter().cloned());
    wrapped
}

/// Make `source` available to the child as descriptor `target`
fn inherit_as(cmd: &mut Command, source: RawFd, target: RawFd) {
    // SAFETY: dup2 is async-signal-safe and touches only the child's table
    unsafe {
        cmd.pre_exec(move || {
            if source != target {
                nix::unistd::dup2(source, target).map_err(io::Error::from)?;
            }
            Ok(())
        });
    }
}

fn classify(
    launcher: &Path,
    command: &[String],
    code: Option<i32>,
    report: &StatusReport,
) -> Result<(), SandboxError> {
    if report.command_started {
        return match report.exit_code.or(code) {
            Some(0) => Ok(()),
            code => Err(SandboxError::CommandFailed {
                program: program_of(command),
                code,
            }),
        };
    }

    match code {
        Some(0) => Ok(()),
        code => Err(SandboxError::SetupFailed(format!(
            "{} exited ({}) before starting the command",
            launcher.display(),
            describe_exit(&code)
        ))),
    }
}

fn program_of(command: &[String]) -> String {
    command.first().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(profile: &IsolationProfile) -> Vec<String> {
        launcher_args(
            profile,
            Path::new("/var/cache/pacforge/hello"),
            &["makepkg".to_string(), "-f".to_string()],
            Some(7),
        )
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
    }

    fn contains_seq(args: &[String], seq: &[&str]) -> bool {
        args.windows(seq.len()).any(|w| w.iter().zip(seq).all(|(a, b)| a == b))
    }

    #[test]
    fn test_build_profile_args() {
        let mut profile = IsolationProfile::build().clone();
        profile.add_rw_bind("/var/cache/pacforge/hello");
        profile.set_env("PKGDEST", "/var/cache/pacforge/hello");
        let args = args_of(&profile);

        assert!(contains_seq(&args, &["--ro-bind-try", "/usr", "/usr"]));
        assert!(contains_seq(&args, &["--dev-bind-try", "/dev", "/dev"]));
        assert!(contains_seq(&args, &["--tmpfs", "/tmp"]));
        assert!(contains_seq(&args, &["--symlink", "usr/bin", "/bin"]));
        assert!(contains_seq(
            &args,
            &["--bind", "/var/cache/pacforge/hello", "/var/cache/pacforge/hello"]
        ));
        assert!(contains_seq(&args, &["--unshare-pid", "--proc", "/proc"]));
        assert!(args.contains(&"--unshare-net".to_string()));
        assert!(args.contains(&"--unshare-ipc".to_string()));
        assert!(args.contains(&"--die-with-parent".to_string()));
        assert!(args.contains(&"--clearenv".to_string()));
        assert!(contains_seq(&args, &["--setenv", "LC_ALL", "C"]));
        assert!(contains_seq(
            &args,
            &["--setenv", "PKGDEST", "/var/cache/pacforge/hello"]
        ));
        assert!(contains_seq(&args, &["--chdir", "/var/cache/pacforge/hello"]));
        assert!(contains_seq(&args, &["--json-status-fd", "7"]));
        assert!(args.ends_with(&["--".to_string(), "makepkg".to_string(), "-f".to_string()]));
        assert!(!args.contains(&"--unshare-user".to_string()));
    }

    #[test]
    fn test_binds_after_tmpfs() {
        let mut profile = IsolationProfile::minimal().clone();
        profile.add_ro_bind("/tmp/recipe");
        profile.add_rw_bind("/tmp/work");
        let args = args_of(&profile);

        let tmpfs = args.iter().position(|a| a == "--tmpfs").unwrap();
        let ro = args.iter().position(|a| a == "/tmp/recipe").unwrap();
        let rw = args.iter().position(|a| a == "/tmp/work").unwrap();
        assert!(ro > tmpfs);
        assert!(rw > tmpfs);
    }

    #[test]
    fn test_network_enabled_clone() {
        let mut profile = IsolationProfile::build().clone();
        profile.set_network(true);
        assert!(!args_of(&profile).contains(&"--unshare-net".to_string()));
        assert!(args_of(IsolationProfile::build()).contains(&"--unshare-net".to_string()));
    }

    #[test]
    fn test_minimal_profile_args() {
        let args = args_of(IsolationProfile::minimal());
        assert!(args.contains(&"--unshare-user".to_string()));
        assert!(args.contains(&"--unshare-cgroup-try".to_string()));
        assert!(contains_seq(&args, &["--uid", "65534", "--gid", "65534"]));
        assert!(contains_seq(&args, &["--cap-drop", "ALL"]));
        assert!(!args.contains(&"--setenv".to_string()));
    }

    #[test]
    fn test_status_report_parse() {
        let data = br#"{ "child-pid": 4242 }
{ "exit-code": 2 }
"#;
        let report = StatusReport::parse(data);
        assert_eq!(report.child_pid, Some(4242));
        assert_eq!(report.exit_code, Some(2));

        assert_eq!(StatusReport::parse(b""), StatusReport::default());
        assert_eq!(StatusReport::parse(b"garbage").child_pid, None);
    }

    #[test]
    fn test_classify() {
        let launcher = Path::new("bwrap");
        let cmd = vec!["makepkg".to_string()];
        let started = StatusReport {
            child_pid: Some(1),
            exit_code: Some(4),
            command_started: true,
        };

        assert!(matches!(
            classify(launcher, &cmd, Some(4), &started),
            Err(SandboxError::CommandFailed { code: Some(4), .. })
        ));
        assert!(matches!(
            classify(launcher, &cmd, Some(1), &StatusReport::default()),
            Err(SandboxError::SetupFailed(_))
        ));
        assert!(matches!(
            classify(launcher, &cmd, None, &StatusReport::default()),
            Err(SandboxError::SetupFailed(_))
        ));

        let ok = StatusReport {
            child_pid: Some(1),
            exit_code: Some(0),
            command_started: true,
        };
        assert!(classify(launcher, &cmd, Some(0), &ok).is_ok());
    }

    #[test]
    fn test_pid_without_start_marker_is_setup_failure() {
        // bwrap reports the pid before mounts, so a failed --bind looks like this
        let mount_failed = StatusReport {
            child_pid: Some(4242),
            exit_code: Some(1),
            command_started: false,
        };
        assert!(matches!(
            classify(Path::new("bwrap"), &["makepkg".to_string()], Some(1), &mount_failed),
            Err(SandboxError::SetupFailed(_))
        ));
    }

    #[test]
    fn test_started_wrapper() {
        let wrapped = started_wrapper(9, &["makepkg".to_string(), "-f".to_string()]);
        assert_eq!(wrapped[0], "/bin/sh");
        assert_eq!(wrapped[1], "-c");
        assert!(wrapped[2].contains(">&9"));
        assert_eq!(&wrapped[3..], &["sh", "makepkg", "-f"]);

        assert_eq!(marker_fd(3), 9);
        assert_eq!(marker_fd(9), 8);
    }

    /// Launcher stand-in: reports a child pid like bwrap, then either stops
    /// (as a failed mount would) or runs the wrapped command
    fn fake_launcher(dir: &Path, runs_command: bool) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let tail = if runs_command { "exec \"$@\"" } else { "exit 1" };
        let script = format!(
            r#"#!/bin/sh
fd=
while [ $# -gt 0 ]; do
  case "$1" in
    --json-status-fd) fd=$2; shift ;;
    --) shift; break ;;
  esac
  shift
done
printf '{{"child-pid": 4242}}\n' > /proc/self/fd/$fd
{tail}
"#
        );
        let path = dir.join(if runs_command { "launcher-ok" } else { "launcher-broken" });
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_launch_classification_end_to_end() {
        if !Path::new("/proc/self/fd").exists() || !Path::new(WRAPPER_SHELL).exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let profile = IsolationProfile::minimal();
        let sh = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];

        let broken = BubblewrapExecutor::new(fake_launcher(dir.path(), false));
        let err = broken.run(profile, dir.path(), &sh("exit 0"), &cancel).unwrap_err();
        assert!(matches!(err, SandboxError::SetupFailed(_)));

        let working = BubblewrapExecutor::new(fake_launcher(dir.path(), true));
        working.run(profile, dir.path(), &sh("exit 0"), &cancel).unwrap();
        let err = working.run(profile, dir.path(), &sh("exit 4"), &cancel).unwrap_err();
        assert!(matches!(err, SandboxError::CommandFailed { code: Some(4), .. }));

        let out = working
            .capture(profile, dir.path(), &sh("echo hello"), &cancel, None)
            .unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn test_launcher_rejecting_arguments_is_setup_failure() {
        // A plain shell chokes on the first bwrap option before running anything
        let executor = BubblewrapExecutor::new("sh");
        let err = executor
            .run(
                IsolationProfile::minimal(),
                Path::new("/"),
                &["true".to_string()],
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SandboxError::SetupFailed(_)));
    }

    #[test]
    fn test_missing_launcher_unavailable() {
        let executor = BubblewrapExecutor::new("/nonexistent/pacforge-bwrap");
        assert!(!executor.available());

        let err = executor
            .run(
                IsolationProfile::minimal(),
                Path::new("/"),
                &["true".to_string()],
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SandboxError::SetupFailed(_)));
    }

    #[test]
    fn test_unsandboxed_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let executor = BubblewrapExecutor::new("bwrap");
        let cancel = CancelToken::new();

        executor
            .run_unsandboxed(dir.path(), &["true".to_string()], &cancel)
            .unwrap();

        let err = executor
            .run_unsandboxed(
                dir.path(),
                &["sh".to_string(), "-c".to_string(), "exit 5".to_string()],
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, SandboxError::CommandFailed { code: Some(5), .. }));
    }
}
