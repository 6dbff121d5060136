//! Owning wrapper for a single poisoning-allocator value.

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::allocators::upstream::{SystemUpstream, UpstreamAllocator};
use crate::api::handle::SafeHandle;
use crate::api::poison_alloc::PoisonAllocator;

/// A Box-like owner of one value in a poisoning allocator.
///
/// The box holds the owner's implicit reference: dropping it deallocates
/// the block, which is quarantined while any [`SafeHandle`] taken from the
/// box is still alive.
///
/// # Example
///
/// ```rust
/// use poisonalloc::PoisonAllocator;
///
/// let alloc = PoisonAllocator::new();
/// let boxed = alloc.alloc_value(42u32).unwrap();
/// let handle = boxed.handle();
///
/// drop(boxed);
/// assert_eq!(*handle, 42); // still readable
/// ```
pub struct PoisonBox<'a, T: Copy, U: UpstreamAllocator = SystemUpstream> {
    ptr: NonNull<T>,
    alloc: &'a PoisonAllocator<U>,
}

// SAFETY: same sharing rules as SafeHandle
unsafe impl<T: Copy + Send + Sync, U: UpstreamAllocator + Sync> Send for PoisonBox<'_, T, U> {}
unsafe impl<T: Copy + Send + Sync, U: UpstreamAllocator + Sync> Sync for PoisonBox<'_, T, U> {}

impl<'a, T: Copy, U: UpstreamAllocator> PoisonBox<'a, T, U> {
    /// Take ownership of an allocated value.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized `T` allocated from `alloc` with
    /// `Layout::new::<T>()`, and the caller must hand over the owner's
    /// reference (nobody else may deallocate it).
    pub unsafe fn from_raw(ptr: NonNull<T>, alloc: &'a PoisonAllocator<U>) -> Self {
        Self { ptr, alloc }
    }

    /// A new handle on the value.
    pub fn handle(&self) -> SafeHandle<'a, T, U> {
        // SAFETY: the box holds the owner's reference, so the block is live
        unsafe { SafeHandle::acquire(self.alloc, self.ptr) }
    }

    /// References currently held on the block, the box included.
    pub fn ref_count(&self) -> usize {
        // SAFETY: the box keeps the block live
        unsafe { self.alloc.block_state(self.ptr.cast()).refs() }
    }

    /// Get the raw pointer.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Give up the box without deallocating, returning the raw pointer.
    ///
    /// The caller becomes the owner and must deallocate with
    /// `size_of::<T>()` and `align_of::<T>()`, or rebuild the box with
    /// [`PoisonBox::from_raw`].
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T: Copy, U: UpstreamAllocator> Deref for PoisonBox<'_, T, U> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized on construction, live while the box exists
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Copy, U: UpstreamAllocator> Drop for PoisonBox<'_, T, U> {
    fn drop(&mut self) {
        // SAFETY: allocated with T's layout, and the box is the only owner
        unsafe {
            self.alloc
                .deallocate(self.ptr.cast(), mem::size_of::<T>(), mem::align_of::<T>())
        };
    }
}

impl<T: Copy + fmt::Debug, U: UpstreamAllocator> fmt::Debug for PoisonBox<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoisonBox").field(&**self).finish()
    }
}
