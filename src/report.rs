//! Subscribe to events in the build pipeline.
//!
//! A [`Reporter`] is entirely passive and only listens to incoming "events",
//! emitted by the orchestrator as it moves through its phases. Implementers
//! can use these callbacks to print custom progress output; the crate ships
//! [`BasicStdoutReporter`] which renders a compact human-readable log.

use crate::compile::Phase;
use once_cell::sync::OnceCell;
use std::time::Duration;
use yansi::Paint;

static GLOBAL_REPORTER: OnceCell<Report> = OnceCell::new();

/// Install this `Reporter` as the global default if one is
/// not already set.
///
/// # Errors
///
/// Returns an error if a global reporter was already installed by another
/// call to `try_init`.
pub fn try_init<T>(reporter: T) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>
where
    T: Reporter + Send + Sync + 'static,
{
    GLOBAL_REPORTER
        .set(Report::new(reporter))
        .map_err(|_| "a global reporter has already been set".into())
}

/// Install this `Reporter` as the global default.
///
/// # Panics
///
/// Panics if a global reporter was already installed.
pub fn init<T>(reporter: T)
where
    T: Reporter + Send + Sync + 'static,
{
    try_init(reporter).expect("Failed to install global reporter")
}

/// Trait representing the functions required to emit information about the
/// steps in the build pipeline.
pub trait Reporter: 'static + Send + Sync {
    /// Invoked on every phase transition with a short message and, where a
    /// phase has measurable units of work, a `current`/`total` pair.
    fn on_phase(&self, _phase: Phase, _message: &str, _current: usize, _total: usize) {}

    /// Invoked right before a module's compiler process is spawned.
    fn on_module_compile_start(&self, _module: &str, _language: &str) {}

    /// Invoked when a module was served from cache instead of rebuilt.
    fn on_module_cached(&self, _module: &str) {}

    /// Invoked after a module's compile finished, successfully or not.
    fn on_module_compiled(&self, _module: &str, _success: bool, _duration: Duration) {}

    /// Invoked after a glue file for the edge `consumer -> producer` was
    /// written.
    fn on_glue_generated(&self, _producer: &str, _consumer: &str) {}

    /// Invoked after the final link step.
    fn on_link_complete(&self, _artifact: &str, _duration: Duration) {}

    /// Invoked for non-fatal problems, e.g. failed interface extraction.
    fn on_warning(&self, _message: &str) {}
}

pub(crate) fn phase(phase: Phase, message: &str, current: usize, total: usize) {
    with_global(|r| r.reporter.on_phase(phase, message, current, total));
}

pub(crate) fn module_compile_start(module: &str, language: &str) {
    with_global(|r| r.reporter.on_module_compile_start(module, language));
}

pub(crate) fn module_cached(module: &str) {
    with_global(|r| r.reporter.on_module_cached(module));
}

pub(crate) fn module_compiled(module: &str, success: bool, duration: Duration) {
    with_global(|r| r.reporter.on_module_compiled(module, success, duration));
}

pub(crate) fn glue_generated(producer: &str, consumer: &str) {
    with_global(|r| r.reporter.on_glue_generated(producer, consumer));
}

pub(crate) fn link_complete(artifact: &str, duration: Duration) {
    with_global(|r| r.reporter.on_link_complete(artifact, duration));
}

pub(crate) fn warning(message: &str) {
    with_global(|r| r.reporter.on_warning(message));
}

fn with_global<F: FnOnce(&Report)>(f: F) {
    if let Some(report) = GLOBAL_REPORTER.get() {
        f(report)
    }
}

struct Report {
    reporter: Box<dyn Reporter + Send + Sync>,
}

impl Report {
    fn new<T: Reporter + Send + Sync>(reporter: T) -> Self {
        Self { reporter: Box::new(reporter) }
    }
}

/// A [`Reporter`] that logs a compact line per event to stdout.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct BasicStdoutReporter;

impl Reporter for BasicStdoutReporter {
    fn on_phase(&self, phase: Phase, message: &str, current: usize, total: usize) {
        if total > 0 {
            println!("[{}/{}] {} {message}", current, total, Paint::cyan(phase));
        } else {
            println!("{} {message}", Paint::cyan(phase));
        }
    }

    fn on_module_compile_start(&self, module: &str, language: &str) {
        println!("  compiling {module} ({language})");
    }

    fn on_module_cached(&self, module: &str) {
        println!("  {} {module}", Paint::green("cached"));
    }

    fn on_module_compiled(&self, module: &str, success: bool, duration: Duration) {
        if success {
            println!("  {} {module} in {duration:.2?}", Paint::green("finished"));
        } else {
            println!("  {} {module}", Paint::red("failed"));
        }
    }

    fn on_glue_generated(&self, producer: &str, consumer: &str) {
        println!("  glue {producer} -> {consumer}");
    }

    fn on_link_complete(&self, artifact: &str, duration: Duration) {
        println!("{} {artifact} in {duration:.2?}", Paint::green("linked"));
    }

    fn on_warning(&self, message: &str) {
        println!("{}: {message}", Paint::yellow("warning"));
    }
}
