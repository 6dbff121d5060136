//! Standard allocator trait implementations for `PoisonAllocator`.
//!
//! `GlobalAlloc` is always available. `std::alloc::Allocator` requires the
//! `nightly` feature and a nightly compiler:
//!
//! ```toml
//! [dependencies]
//! poisonalloc = { version = "0.1", features = ["nightly"] }
//! ```

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::{self, NonNull};

use crate::allocators::upstream::UpstreamAllocator;
use crate::api::poison_alloc::PoisonAllocator;

/// Lets a `PoisonAllocator` stand in for the process allocator.
///
/// Allocation failures become null pointers. Install it only over an
/// upstream that does not itself use the global allocator (such as
/// [`SystemUpstream`](crate::SystemUpstream)), and with the `debug` feature
/// off, since block tracking allocates. Contract violations detected here
/// panic inside the allocator, which aborts the process.
///
/// ```rust,ignore
/// use poisonalloc::PoisonAllocator;
///
/// #[global_allocator]
/// static GLOBAL: PoisonAllocator = PoisonAllocator::new();
/// ```
unsafe impl<U: UpstreamAllocator> GlobalAlloc for PoisonAllocator<U> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_layout(layout)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.deallocate_layout(ptr, layout);
        }
    }
}

#[cfg(feature = "nightly")]
mod nightly {
    use std::alloc::{AllocError, Allocator, Layout};
    use std::ptr::NonNull;

    use crate::allocators::upstream::UpstreamAllocator;
    use crate::api::poison_alloc::PoisonAllocator;

    /// Use with standard collections: `Vec::new_in(&alloc)`.
    ///
    /// Collections never take handles, so their frees always poison and
    /// release immediately.
    unsafe impl<U: UpstreamAllocator> Allocator for PoisonAllocator<U> {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            self.allocate_layout(layout)
                .map(|p| NonNull::slice_from_raw_parts(p, layout.size()))
                .map_err(|_| AllocError)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.deallocate_layout(ptr, layout);
        }
    }
}
