//! Reference-counted handles into poisoning-allocator blocks.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::allocators::upstream::{SystemUpstream, UpstreamAllocator};
use crate::api::error::PoisonError;
use crate::api::poison_alloc::PoisonAllocator;
use crate::diagnostics;

/// A shared reference to a payload that keeps its block from being
/// poisoned.
///
/// Each handle holds one unit of the block's reference count. Cloning takes
/// another unit, dropping gives it back, and moving a handle transfers its
/// unit without touching the count. If the owner has already deallocated
/// the block, the handle that drops last poisons the payload and returns
/// the block upstream.
///
/// Handles only give shared access. Synchronizing writes to the payload is
/// up to the caller.
pub struct SafeHandle<'a, T, U: UpstreamAllocator = SystemUpstream> {
    ptr: NonNull<T>,
    alloc: &'a PoisonAllocator<U>,
    _marker: PhantomData<T>,
}

// SAFETY: like Arc, a handle shares T across threads and may finalize the
// block from whichever thread drops it last.
unsafe impl<T: Send + Sync, U: UpstreamAllocator + Sync> Send for SafeHandle<'_, T, U> {}
unsafe impl<T: Send + Sync, U: UpstreamAllocator + Sync> Sync for SafeHandle<'_, T, U> {}

impl<'a, T, U: UpstreamAllocator> SafeHandle<'a, T, U> {
    /// Take a handle on the payload at `ptr`.
    ///
    /// With `verify_handles` enabled, a released block, a block whose owner
    /// already deallocated, or a `T` that does not fit the payload is
    /// reported and panics. A null pointer always panics.
    ///
    /// # Safety
    ///
    /// `ptr` must be the payload of a block from `alloc` whose owner has not
    /// deallocated it, and must hold an initialized `T`. Without
    /// `verify_handles`, violating this is undefined behaviour.
    #[track_caller]
    pub unsafe fn new(alloc: &'a PoisonAllocator<U>, ptr: *mut T) -> Self {
        let Some(ptr) = NonNull::new(ptr) else {
            diagnostics::fatal(&diagnostics::PA001, "null payload pointer");
        };

        if alloc.config().verify_handles {
            if let Err(diag) = alloc.check_reference(ptr.cast(), Layout::new::<T>()) {
                alloc.violation(diag, ptr.cast(), "rejected handle construction");
            }
        }

        Self::acquire(alloc, ptr)
    }

    /// Take a handle, reporting an invalid block as an error instead of
    /// panicking.
    ///
    /// The header is always checked, whatever the config says.
    ///
    /// # Safety
    ///
    /// The header in front of `ptr` must be readable: either the block is
    /// still live or quarantined, or the upstream allocator keeps released
    /// storage mapped.
    pub unsafe fn try_new(alloc: &'a PoisonAllocator<U>, ptr: *mut T) -> Result<Self, PoisonError> {
        let ptr = NonNull::new(ptr).ok_or(PoisonError::InvalidReference)?;
        alloc
            .check_reference(ptr.cast(), Layout::new::<T>())
            .map_err(|_| PoisonError::InvalidReference)?;
        Ok(Self::acquire(alloc, ptr))
    }

    /// # Safety
    ///
    /// The block must be held by its owner or by another handle.
    pub(crate) unsafe fn acquire(alloc: &'a PoisonAllocator<U>, ptr: NonNull<T>) -> Self {
        alloc.acquire(ptr.cast());
        Self {
            ptr,
            alloc,
            _marker: PhantomData,
        }
    }

    /// References currently held on the block, owner included.
    pub fn ref_count(&self) -> usize {
        // SAFETY: this handle keeps the block unfinalized
        unsafe { self.alloc.block_state(self.ptr.cast()).refs() }
    }

    /// Whether the owner has deallocated the block.
    pub fn is_pending_release(&self) -> bool {
        // SAFETY: this handle keeps the block unfinalized
        unsafe { self.alloc.block_state(self.ptr.cast()).is_pending_release() }
    }

    /// Get the raw pointer.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Whether two handles name the same block.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// The allocator owning the block.
    pub fn allocator(&self) -> &'a PoisonAllocator<U> {
        self.alloc
    }
}

impl<T, U: UpstreamAllocator> Clone for SafeHandle<'_, T, U> {
    fn clone(&self) -> Self {
        // SAFETY: self holds a reference, so the block is not finalized
        unsafe { Self::acquire(self.alloc, self.ptr) }
    }
}

impl<T, U: UpstreamAllocator> Drop for SafeHandle<'_, T, U> {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference on the block
        unsafe { self.alloc.release(self.ptr.cast()) };
    }
}

impl<T, U: UpstreamAllocator> Deref for SafeHandle<'_, T, U> {
    type Target = T;

    fn deref(&self) -> &T {
        if self.alloc.config().check_on_deref {
            // SAFETY: the handle's reference keeps header and payload mapped
            unsafe { self.alloc.check_access(self.ptr.cast(), mem::size_of::<T>()) };
        }

        // SAFETY: payload initialized per `new`'s contract, kept alive by
        // our reference, and only ever shared
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: fmt::Debug, U: UpstreamAllocator> fmt::Debug for SafeHandle<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeHandle")
            .field("ptr", &self.ptr)
            .field("refs", &self.ref_count())
            .field("value", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::PoisonConfig;
    use crate::core::header::BlockState;
    use crate::testing::RecordingUpstream;
    use std::mem::ManuallyDrop;

    fn recording() -> PoisonAllocator<RecordingUpstream> {
        PoisonAllocator::with_upstream_and_config(
            RecordingUpstream::new(),
            PoisonConfig::diagnostic(),
        )
    }

    fn alloc_u64<U: UpstreamAllocator>(alloc: &PoisonAllocator<U>, value: u64) -> *mut u64 {
        let ptr = alloc.allocate(8, 8).unwrap().cast::<u64>().as_ptr();
        unsafe { ptr.write(value) };
        ptr
    }

    #[test]
    fn test_handle_counts_and_reads() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 42);

        let handle = unsafe { SafeHandle::new(&alloc, ptr) };
        assert_eq!(*handle, 42);
        assert_eq!(handle.ref_count(), 2);

        let copy = handle.clone();
        assert!(SafeHandle::ptr_eq(&handle, &copy));
        assert_eq!(copy.ref_count(), 3);

        drop(copy);
        drop(handle);
        assert_eq!(
            unsafe { alloc.block_state(NonNull::new_unchecked(ptr).cast()) },
            BlockState::Live { refs: 1 }
        );
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
    }

    #[test]
    fn test_move_keeps_count() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 1);

        let handle = unsafe { SafeHandle::new(&alloc, ptr) };
        let mut slot = Some(handle);
        let moved = slot.take().unwrap();
        assert_eq!(moved.ref_count(), 2);

        // Destroying the emptied slot is a no-op.
        drop(slot);
        assert_eq!(moved.ref_count(), 2);

        drop(moved);
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
    }

    #[test]
    fn test_last_handle_finalizes_after_owner() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 9);
        let handle = unsafe { SafeHandle::new(&alloc, ptr) };
        alloc.upstream().take_events();

        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
        assert!(handle.is_pending_release());
        assert_eq!(*handle, 9);
        assert!(alloc.upstream().take_events().is_empty());
        assert_eq!(alloc.stats().quarantined, 1);

        drop(handle);
        assert_eq!(alloc.upstream().take_events().len(), 1);
        assert_eq!(alloc.stats().quarantined, 0);
        assert_eq!(alloc.stats().finalized, 1);
    }

    #[test]
    fn test_try_new_rejects_null_and_pending_blocks() {
        let alloc = recording();
        assert_eq!(
            unsafe { SafeHandle::<u64, _>::try_new(&alloc, std::ptr::null_mut()) }.err(),
            Some(PoisonError::InvalidReference)
        );

        let ptr = alloc_u64(&alloc, 5);
        let keep = unsafe { SafeHandle::new(&alloc, ptr) };
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };

        assert_eq!(
            unsafe { SafeHandle::try_new(&alloc, ptr) }.err(),
            Some(PoisonError::InvalidReference)
        );
        assert_eq!(keep.ref_count(), 1);
    }

    #[test]
    fn test_try_new_rejects_oversized_type() {
        let alloc = recording();
        let ptr = alloc.allocate(4, 4).unwrap();
        assert!(unsafe { SafeHandle::try_new(&alloc, ptr.cast::<u64>().as_ptr()) }.is_err());
        unsafe { alloc.deallocate(ptr, 4, 4) };
    }

    #[test]
    #[should_panic(expected = "PA005")]
    fn test_new_after_owner_deallocate_is_fatal() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 5);
        let _keep = unsafe { SafeHandle::new(&alloc, ptr) };
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
        let _late = unsafe { SafeHandle::new(&alloc, ptr) };
    }

    #[test]
    #[should_panic(expected = "PA001")]
    fn test_new_from_null_is_fatal() {
        let alloc = recording();
        let _handle = unsafe { SafeHandle::<u32, _>::new(&alloc, std::ptr::null_mut()) };
    }

    #[test]
    #[should_panic(expected = "payload carries the poison pattern")]
    fn test_deref_after_finalize_is_fatal() {
        let alloc = PoisonAllocator::with_upstream_and_config(
            RecordingUpstream::retaining(),
            PoisonConfig::diagnostic(),
        );
        let ptr = alloc_u64(&alloc, 11);
        let handle = unsafe { SafeHandle::new(&alloc, ptr) };

        // A bitwise copy holds no reference of its own.
        let stale = ManuallyDrop::new(unsafe { std::ptr::read(&handle) });
        drop(handle);
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };

        let value: u64 = **stale;
        assert_eq!(value, 11);
    }

    #[test]
    #[should_panic(expected = "header canary was overwritten")]
    fn test_deref_with_overwritten_header_is_fatal() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 12);
        let handle = unsafe { SafeHandle::new(&alloc, ptr) };

        // The canary is the last word of the header.
        unsafe { ptr.cast::<usize>().sub(1).write(0) };
        assert_eq!(*handle, 12);
    }

    #[test]
    fn test_handle_names_its_allocator() {
        let alloc = recording();
        let other = recording();
        let ptr = alloc_u64(&alloc, 4);
        let handle = unsafe { SafeHandle::new(&alloc, ptr) };

        assert!(std::ptr::eq(handle.allocator(), &alloc));
        assert!(!std::ptr::eq(handle.allocator(), &other));

        drop(handle);
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
    }

    #[test]
    fn test_debug_shows_value() {
        let alloc = recording();
        let ptr = alloc_u64(&alloc, 77);
        let handle = unsafe { SafeHandle::new(&alloc, ptr) };
        assert!(format!("{:?}", handle).contains("value: 77"));
        drop(handle);
        unsafe { alloc.deallocate(NonNull::new_unchecked(ptr).cast(), 8, 8) };
    }
}
