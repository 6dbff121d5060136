//! Coded diagnostics for contract violations and shutdown reports.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                                   |
//! |-------|-------------------------------------------|
//! | PA001 | Handle from a null or released block      |
//! | PA002 | Double deallocate                         |
//! | PA003 | Size/alignment mismatch on deallocate     |
//! | PA004 | Access after the block was finalized      |
//! | PA005 | Handle taken after the owner deallocated  |
//! | PA006 | Handle type does not fit the payload      |
//! | PA101 | Quarantined blocks at allocator drop      |
//! | PA102 | Leaked blocks at allocator drop           |
//! | PA901 | Corrupted block header                    |
//!
//! Errors are fatal: they are emitted and then the offending call panics.
//! Warnings only panic under strict mode.

pub mod emit;
pub mod kind;
pub mod macros;
pub mod strict;

pub use emit::{emit, emit_with_context, fatal, set_sink, set_verbose, suppress_diagnostics};
pub use emit::{CollectingSink, DiagnosticSink};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{PA001, PA002, PA003, PA004, PA005, PA006, PA101, PA102, PA901};
