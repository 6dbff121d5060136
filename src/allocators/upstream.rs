//! The allocator that supplies and reclaims the raw block storage.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::error::PoisonError;
use crate::sync::atomics::{AtomicCounter, AtomicGauge};

/// Raw byte-range allocator wrapped by a poisoning allocator.
///
/// # Safety
///
/// Implementors must return storage of at least `layout.size()` bytes aligned
/// to exactly `layout.align()`, keep it valid until the matching
/// `deallocate`, and accept concurrent calls for distinct blocks.
pub unsafe trait UpstreamAllocator {
    /// Allocate storage for `layout`. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError>;

    /// Return storage obtained from `allocate`.
    ///
    /// # Safety
    ///
    /// `ptr` and `layout` must match a prior successful `allocate` call that
    /// has not been deallocated yet.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

unsafe impl<U: UpstreamAllocator + ?Sized> UpstreamAllocator for &U {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

unsafe impl<U: UpstreamAllocator + ?Sized> UpstreamAllocator for Arc<U> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

/// The platform allocator (`std::alloc::System`).
///
/// Goes straight to `System` rather than the global allocator, so a
/// poisoning allocator on top of it can itself be installed as
/// `#[global_allocator]`.
pub struct SystemUpstream {
    /// Total bytes currently allocated
    allocated_bytes: AtomicGauge,

    /// Total allocation count
    allocation_count: AtomicCounter,
}

impl SystemUpstream {
    /// Create a new system upstream.
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicGauge::new(),
            allocation_count: AtomicCounter::new(),
        }
    }

    /// Bytes currently held from the system, headers included.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    /// Number of blocks ever requested from the system.
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.get()
    }
}

impl Default for SystemUpstream {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl UpstreamAllocator for SystemUpstream {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError> {
        debug_assert!(layout.size() != 0);

        // SAFETY: layout has a non-zero size
        let ptr = unsafe { System.alloc(layout) };

        let ptr = NonNull::new(ptr).ok_or(PoisonError::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        })?;

        self.allocated_bytes.add(layout.size());
        self.allocation_count.increment();
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        System.dealloc(ptr.as_ptr(), layout);
        self.allocated_bytes.sub(layout.size());
    }
}
