//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` facade, and an
//! optional installed sink.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::should_panic_on_warning;
use crate::sync::mutex::Mutex;

/// Global flag to suppress stderr output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Global flag to enable verbose diagnostics.
static VERBOSE_DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Sink receiving every emitted diagnostic, suppressed or not.
static SINK: Mutex<Option<Arc<dyn DiagnosticSink>>> = Mutex::new(None);

/// Suppress stderr output. Sinks and `log` still receive diagnostics.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Enable verbose diagnostic output.
pub fn set_verbose(verbose: bool) {
    VERBOSE_DIAGNOSTICS.store(verbose, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Install a sink for all subsequent diagnostics, returning the previous one.
pub fn set_sink(sink: Option<Arc<dyn DiagnosticSink>>) -> Option<Arc<dyn DiagnosticSink>> {
    std::mem::replace(&mut *SINK.lock(), sink)
}

/// Emit a diagnostic.
///
/// Stderr output only happens in debug builds or with the `diagnostics`
/// feature. Warnings panic under [`StrictMode::PanicOnWarning`].
///
/// [`StrictMode::PanicOnWarning`]: super::strict::StrictMode::PanicOnWarning
pub fn emit(diag: &Diagnostic) {
    dispatch(diag, None);

    if diag.kind == DiagnosticKind::Warning && should_panic_on_warning() {
        panic!(
            "[poisonalloc][{}] {}\nStrict mode enabled - warnings are fatal.",
            diag.code, diag.message
        );
    }
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    dispatch(diag, Some(context));

    if diag.kind == DiagnosticKind::Warning && should_panic_on_warning() {
        panic!(
            "[poisonalloc][{}] {}\nContext: {}\nStrict mode enabled - warnings are fatal.",
            diag.code, diag.message, context
        );
    }
}

/// Emit a contract violation and abort the current operation.
///
/// Continuing past a violated block contract would corrupt the reference
/// count, so this never returns.
#[cold]
#[track_caller]
pub fn fatal(diag: &Diagnostic, context: &str) -> ! {
    dispatch(diag, Some(context));
    panic!("[poisonalloc][{}] {}\nContext: {}", diag.code, diag.message, context);
}

fn dispatch(diag: &Diagnostic, context: Option<&str>) {
    let sink = SINK.lock().clone();
    if let Some(sink) = sink {
        sink.emit(diag);
    }

    #[cfg(feature = "log")]
    emit_to_log(diag, context);

    if is_suppressed() {
        return;
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    emit_to_stderr(diag, context);

    #[cfg(not(any(debug_assertions, feature = "diagnostics")))]
    let _ = context;
}

/// Internal: emit to stderr.
#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();
    let verbose = VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed);

    let _ = writeln!(
        stderr,
        "[poisonalloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );

    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }

    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }

    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }

    if verbose && diag.kind == DiagnosticKind::Error {
        let _ = writeln!(
            stderr,
            "  hint: enable the `debug` feature to record allocation backtraces"
        );
    }

    let _ = writeln!(stderr);
}

/// Forward a diagnostic to the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("-");
    match diag.kind {
        DiagnosticKind::Error => {
            log::error!("[{}] {} ({})", diag.code, diag.message, context);
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {} ({})", diag.code, diag.message, context);
        }
        DiagnosticKind::Note => {
            log::info!("[{}] {} ({})", diag.code, diag.message, context);
        }
    }

    if let Some(help) = diag.help {
        log::info!("  help: {}", help);
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic.
    fn emit(&self, diag: &Diagnostic);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Whether a diagnostic with `code` was collected.
    pub fn contains(&self, code: &str) -> bool {
        self.diagnostics.lock().iter().any(|d| d.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic) {
        self.diagnostics.lock().push(diag.clone());
    }
}
