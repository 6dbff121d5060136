//! Debug utilities for tracking blocks.
//!
//! Only compiled when the `debug` feature is enabled.

pub mod backtrace;

pub use self::backtrace::{BlockTrace, TraceState};
