//! # poisonalloc
//!
//! A reference-counted poisoning allocator with safe handles, for catching
//! use-after-free in tests and debug builds.
//!
//! ## Features
//!
//! - Hidden per-block header with a canary, size and reference count
//! - Deferred release: a deallocated block stays readable while any
//!   [`SafeHandle`] to it is alive
//! - Every freed payload is overwritten with [`POISON_BYTE`] before it goes
//!   back to the upstream allocator
//! - Coded diagnostics (`PA001`..`PA901`) for contract violations
//! - `GlobalAlloc`, plus `std::alloc::Allocator` behind `nightly`
//!
//! ## Quick Start
//!
//! ```rust
//! use poisonalloc::{PoisonAllocator, SafeHandle};
//!
//! let alloc = PoisonAllocator::new();
//! let ptr = alloc.allocate(64, 8).unwrap();
//! unsafe { ptr.cast::<u64>().as_ptr().write(0xFEED) };
//!
//! let handle = unsafe { SafeHandle::new(&alloc, ptr.cast::<u64>().as_ptr()) };
//! unsafe { alloc.deallocate(ptr, 64, 8) };
//!
//! // Quarantined, not freed: the handle still sees the value.
//! assert_eq!(*handle, 0xFEED);
//! drop(handle); // poisoned and returned upstream here
//! ```
//!
//! ## Cargo features
//!
//! - `parking_lot`: faster internal mutexes
//! - `debug`: backtraces for every live and quarantined block
//! - `diagnostics`: print diagnostics to stderr in release builds
//! - `log`: route diagnostics through the `log` crate
//! - `nightly`: `std::alloc::Allocator` implementation

#![cfg_attr(feature = "nightly", feature(allocator_api))]

// Public modules
pub mod api;
pub mod diagnostics;
pub mod testing;

// Internal modules
mod allocators;
mod core;
mod sync;
mod util;

#[cfg(feature = "debug")]
pub mod debug;

// Re-exports for convenience
pub use api::config::PoisonConfig;
pub use api::error::PoisonError;
pub use api::handle::SafeHandle;
pub use api::poison_alloc::PoisonAllocator;
pub use api::stats::PoisonStats;
pub use api::wrappers::PoisonBox;

pub use allocators::upstream::{SystemUpstream, UpstreamAllocator};

pub use crate::core::block::BlockLayout;
pub use crate::core::header::{BlockState, HEADER_CANARY, HEADER_SIZE, RELEASED_CANARY};
pub use crate::core::poison::{is_poisoned, POISON_BYTE};

pub use util::size::format_bytes;

// Diagnostics re-exports
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_strict_mode, StrictMode, StrictModeGuard};
pub use diagnostics::{PA001, PA002, PA003, PA004, PA005, PA006, PA101, PA102, PA901};
