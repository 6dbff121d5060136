//! Sentinel pattern written over finalized payloads.
//!
//! Any read through a dangling reference to a finalized block sees this
//! pattern instead of whatever the upstream allocator reuses the bytes for.

/// Byte written over every payload byte before the block goes upstream.
pub const POISON_BYTE: u8 = 0xCF;

/// Number of leading payload bytes inspected by [`looks_finalized`].
const PROBE_LEN: usize = 16;

/// Overwrite `size` bytes at `ptr` with [`POISON_BYTE`].
///
/// # Safety
///
/// The memory region must be valid and writable.
#[inline]
pub(crate) unsafe fn poison_region(ptr: *mut u8, size: usize) {
    std::ptr::write_bytes(ptr, POISON_BYTE, size);
}

/// Check whether every byte carries the sentinel.
///
/// An empty slice counts as poisoned.
pub fn is_poisoned(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == POISON_BYTE)
}

/// Cheap probe of the first few payload bytes.
///
/// # Safety
///
/// The memory region must be valid for reads of `size` bytes.
pub(crate) unsafe fn looks_finalized(ptr: *const u8, size: usize) -> bool {
    let len = size.min(PROBE_LEN);
    len > 0 && is_poisoned(std::slice::from_raw_parts(ptr, len))
}
