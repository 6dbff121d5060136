//! Public API for poisonalloc.
//!
//! Most users only need [`PoisonAllocator`](poison_alloc::PoisonAllocator),
//! [`SafeHandle`](handle::SafeHandle) and [`PoisonBox`](wrappers::PoisonBox).

pub mod allocator_impl;
pub mod config;
pub mod error;
pub mod handle;
pub mod poison_alloc;
pub mod stats;
pub mod wrappers;
