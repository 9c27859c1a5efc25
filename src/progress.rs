// src/progress.rs

//! Progress reporting for the build pipeline
//!
//! The builder notifies a [`ProgressSink`] with the stage and a short
//! message at the start of every stage. Sinks are advisory: nothing they do
//! can change the outcome of a build.
//!
//! Implementations:
//! - `SilentProgress`: no-op, the default
//! - `LogProgress`: logs each stage through tracing
//! - `CallbackProgress`: forwards events to a closure
//!
//! # Example
//!
//! ```ignore
//! use pacforge::progress::CallbackProgress;
//!
//! let progress = CallbackProgress::new(|event| {
//!     eprintln!(":: {} {}", event.stage, event.message);
//! });
//! ```

use crate::build::Stage;
use tracing::info;

/// Receives stage notifications from the builder
///
/// Implementations must be thread-safe so a sink can be shared between
/// builders running on different threads.
pub trait ProgressSink: Send + Sync {
    /// A stage is about to start
    fn stage(&self, stage: Stage, message: &str);
}

/// Progress sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn stage(&self, _stage: Stage, _message: &str) {}
}

/// Progress sink that logs stages
#[derive(Debug, Clone)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    /// Create a logging sink; `name` prefixes every line
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressSink for LogProgress {
    fn stage(&self, stage: Stage, message: &str) {
        info!("{} [{}]: {}", self.name, stage, message);
    }
}

/// Event passed to a [`CallbackProgress`] closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

/// Callback-based progress sink
///
/// Useful for front ends that render progress themselves.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn stage(&self, stage: Stage, message: &str) {
        (self.callback)(ProgressEvent {
            stage,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_silent_progress() {
        let progress = SilentProgress;
        progress.stage(Stage::Resolve, "looking up foo");
    }

    #[test]
    fn test_log_progress() {
        let progress = LogProgress::new("foo");
        progress.stage(Stage::Build, "running makepkg");
    }

    #[test]
    fn test_callback_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let progress = CallbackProgress::new(move |event| {
            events_clone.lock().unwrap().push(event);
        });

        progress.stage(Stage::Fetch, "cloning");
        progress.stage(Stage::Parse, "reading PKGBUILD");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, Stage::Fetch);
        assert_eq!(events[1].message, "reading PKGBUILD");
    }

    #[test]
    fn test_sink_as_trait_object() {
        let sinks: Vec<Box<dyn ProgressSink>> =
            vec![Box::new(SilentProgress), Box::new(LogProgress::new("x"))];
        for sink in &sinks {
            sink.stage(Stage::Collect, "scanning");
        }
    }
}
