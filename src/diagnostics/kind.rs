//! Diagnostic kinds and predefined codes.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A caller contract violation. Always fatal once emitted.
    Error,
    /// Something is probably wrong, such as a leak at shutdown.
    Warning,
    /// Additional context.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `PA0xx` - Contract violations on blocks and handles
/// - `PA1xx` - Allocator shutdown reports
/// - `PA9xx` - Internal errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "PA001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// PA0xx - Contract violations
// =============================================================================

/// PA001: Handle constructed from a null or released block.
pub const PA001: Diagnostic = Diagnostic::error(
    "PA001",
    "handle constructed from a null or released block"
).with_note("the block header no longer carries the live canary")
 .with_help("take handles while the owner still holds the allocation");

/// PA002: Block deallocated twice.
pub const PA002: Diagnostic = Diagnostic::error(
    "PA002",
    "block deallocated more than once"
).with_note("the owner's freed flag was already set")
 .with_help("make sure exactly one owner calls deallocate; share access through handles");

/// PA003: Size or alignment passed to deallocate does not match allocate.
pub const PA003: Diagnostic = Diagnostic::error(
    "PA003",
    "deallocate called with a size or alignment different from allocate"
).with_note("the block header records the layout it was allocated with")
 .with_help("pass the exact size and alignment used for the allocation");

/// PA004: Payload accessed after the block was finalized.
pub const PA004: Diagnostic = Diagnostic::error(
    "PA004",
    "payload accessed after the block was poisoned and released"
).with_note("a handle outlived the reference count that kept its block alive")
 .with_help("a handle was likely forged from a raw pointer; clone existing handles");

/// PA005: Handle constructed against a block its owner already deallocated.
pub const PA005: Diagnostic = Diagnostic::error(
    "PA005",
    "handle constructed after the owner deallocated the block"
).with_note("the block is quarantined until its existing handles drop")
 .with_help("clone an existing handle, or take handles before deallocating");

/// PA006: Handle type does not fit the payload.
pub const PA006: Diagnostic = Diagnostic::error(
    "PA006",
    "handle type is larger or more aligned than the allocated payload"
).with_help("allocate with size_of::<T>() and align_of::<T>() of the handle type");

// =============================================================================
// PA1xx - Shutdown reports
// =============================================================================

/// PA101: Blocks still quarantined when the allocator is dropped.
pub const PA101: Diagnostic = Diagnostic::warning(
    "PA101",
    "blocks are still quarantined when the allocator is dropped"
).with_note("handles to these blocks were leaked, so they were never poisoned")
 .with_help("look for mem::forget or reference cycles holding handles");

/// PA102: Blocks never deallocated when the allocator is dropped.
pub const PA102: Diagnostic = Diagnostic::warning(
    "PA102",
    "blocks were never deallocated by their owner"
).with_note("these blocks leak their upstream storage")
 .with_help("enable the `debug` feature to see where they were allocated");

// =============================================================================
// PA9xx - Internal
// =============================================================================

/// PA901: Header state is inconsistent.
pub const PA901: Diagnostic = Diagnostic::error(
    "PA901",
    "block header is corrupted"
).with_note("the recorded layout can no longer describe the block")
 .with_help("a buffer overrun from a neighbouring allocation may have overwritten the header");
