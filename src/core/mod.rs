//! Block bookkeeping shared by the allocator and the handle type.

pub(crate) mod block;
pub(crate) mod header;
pub(crate) mod poison;
