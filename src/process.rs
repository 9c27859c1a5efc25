// src/process.rs

//! Cancellable execution of external processes
//!
//! Every suspension point of the build pipeline (git, dependency probing,
//! makepkg, pacman) goes through [`run`], which polls the child and kills it
//! when the caller's [`CancelToken`] fires. [`cancel_on_interrupt`] fires a
//! token on SIGINT or SIGTERM.

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::ffi::c_int;
use std::fmt;
use std::io;
use std::process::{Child, Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Interval between cancellation checks while a child runs
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag; cancelling any clone cancels all.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken").field(&self.is_cancelled()).finish()
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

impl ProcessError {
    /// Convert into a crate error, keeping cancellation distinct
    pub fn into_error(self, wrap: impl FnOnce(String) -> crate::Error) -> crate::Error {
        match self {
            ProcessError::Cancelled { .. } => crate::Error::Cancelled,
            other => wrap(other.to_string()),
        }
    }
}

/// Name of the program a command will execute, for diagnostics
pub fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Spawn `cmd` and wait for it, honoring cancellation and an optional deadline
pub fn run(
    cmd: &mut Command,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<ExitStatus, ProcessError> {
    let program = program_name(cmd);
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled { program });
    }

    debug!("Running {:?}", cmd);
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    wait(&mut child, &program, cancel, timeout)
}

/// Wait for an already spawned child
pub fn wait(
    child: &mut Child,
    program: &str,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<ExitStatus, ProcessError> {
    let start = Instant::now();

    loop {
        let status = child
            .wait_timeout(POLL_INTERVAL)
            .map_err(|source| ProcessError::Wait {
                program: program.to_string(),
                source,
            })?;

        if let Some(status) = status {
            return Ok(status);
        }

        if cancel.is_cancelled() {
            warn!("Cancelling {}", program);
            kill(child, program);
            return Err(ProcessError::Cancelled {
                program: program.to_string(),
            });
        }

        if let Some(limit) = timeout
            && start.elapsed() >= limit
        {
            kill(child, program);
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                timeout: limit,
            });
        }
    }
}

fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill {}: {}", program, e);
    }
    // Reap so the child does not linger as a zombie
    let _ = child.wait();
}

/// Set by the interrupt handler, cleared once forwarded to a token
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signal: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Cancel `token` on the first SIGINT or SIGTERM
///
/// The handler resets to the default action when it runs, so a second
/// signal terminates the process immediately.
pub fn cancel_on_interrupt(token: &CancelToken) -> io::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { sigaction(signal, &action) }?;
    }
    forward_interrupts(&INTERRUPTED, token.clone())?;
    Ok(())
}

/// Watch `flag` from a thread and cancel `token` once it is set
fn forward_interrupts(flag: &'static AtomicBool, token: CancelToken) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("interrupt-watcher".to_string())
        .spawn(move || {
            while !flag.swap(false, Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);
            }
            warn!("Interrupted, cancelling the running build");
            token.cancel();
        })
}
