//! Upstream allocator boundary.
//!
//! This module and `api::poison_alloc` are the only places that hand raw
//! storage back and forth.

pub(crate) mod upstream;
