//! Synchronization primitives.
//!
//! Relaxed statistics counters, and a mutex shim over std or parking_lot for
//! the few paths that are allowed to lock (debug tracking, test upstreams).

pub(crate) mod atomics;
pub(crate) mod mutex;
