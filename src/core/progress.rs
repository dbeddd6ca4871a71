//! Progress reporting and cooperative cancellation
//!
//! The engine never talks to a display. It emits [`ProgressEvent`]s to an
//! injected [`ProgressSink`] and polls a [`CancellationToken`] at well-defined
//! boundaries: CSV batch boundaries, orchestrator phase boundaries, network
//! epochs, complexity-search candidates, final-training retries and
//! calibration sub-tasks. Nothing is interrupted mid-epoch.

use crate::core::{ClassifierError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Value substituted into a progress template placeholder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressArg {
    Count(usize),
    Value(f64),
}

impl fmt::Display for ProgressArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressArg::Count(n) => write!(f, "{n}"),
            ProgressArg::Value(v) => write!(f, "{v:.4}"),
        }
    }
}

/// Structured status event
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub task: String,
    /// Message with `{}` placeholders filled from `args` in order
    pub template: String,
    pub args: Vec<ProgressArg>,
    /// Nesting level for sub-tasks
    pub indent: usize,
    /// Overwrite the previously rendered line instead of appending
    pub replace_previous: bool,
}

impl ProgressEvent {
    pub fn new(task: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            template: template.into(),
            args: Vec::new(),
            indent: 0,
            replace_previous: false,
        }
    }

    pub fn count(mut self, n: usize) -> Self {
        self.args.push(ProgressArg::Count(n));
        self
    }

    pub fn value(mut self, v: f64) -> Self {
        self.args.push(ProgressArg::Value(v));
        self
    }

    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace_previous = true;
        self
    }

    /// Fill the template placeholders. Surplus placeholders are left as-is.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.template.len() + 16);
        let mut args = self.args.iter();
        let mut rest = self.template.as_str();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => out.push_str(&arg.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Receiver of progress events
pub trait ProgressSink: Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Cloneable cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with [`ClassifierError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ClassifierError::Cancelled)
        } else {
            Ok(())
        }
    }
}
