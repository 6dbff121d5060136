//! Test support: an upstream allocator that records what reaches it.
//!
//! Poisoning is only observable at the upstream boundary, at the moment a
//! block is handed back. `RecordingUpstream` snapshots every returned block
//! so tests can assert on the sentinel, and can keep released storage mapped
//! so headers of finalized blocks stay readable.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::allocators::upstream::{SystemUpstream, UpstreamAllocator};
use crate::api::error::PoisonError;
use crate::core::block::payload_offset;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;

/// One call that reached the upstream allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A block was handed out.
    Allocate { address: usize, layout: Layout },
    /// A block came back; `bytes` is the whole block at that moment.
    Deallocate {
        address: usize,
        layout: Layout,
        bytes: Vec<u8>,
    },
}

impl UpstreamEvent {
    /// Upstream address of the block.
    pub fn address(&self) -> usize {
        match *self {
            UpstreamEvent::Allocate { address, .. }
            | UpstreamEvent::Deallocate { address, .. } => address,
        }
    }

    /// Upstream layout of the block.
    pub fn layout(&self) -> Layout {
        match *self {
            UpstreamEvent::Allocate { layout, .. } | UpstreamEvent::Deallocate { layout, .. } => {
                layout
            }
        }
    }

    /// Payload bytes of a returned block.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            UpstreamEvent::Deallocate { layout, bytes, .. } => {
                Some(&bytes[payload_offset(layout.align())..])
            }
            UpstreamEvent::Allocate { .. } => None,
        }
    }

    /// Payload address for the block this event describes.
    pub fn payload_address(&self) -> usize {
        self.address() + payload_offset(self.layout().align())
    }
}

/// Upstream allocator that records every call in a lock-free log.
pub struct RecordingUpstream {
    inner: SystemUpstream,
    events: SegQueue<UpstreamEvent>,
    allocations: AtomicCounter,
    deallocations: AtomicCounter,
    fail_next: AtomicUsize,
    retain: bool,
    retained: Mutex<Vec<(usize, Layout)>>,
}

impl RecordingUpstream {
    /// Recorder that really frees returned blocks.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Recorder that keeps returned blocks mapped until it is dropped, so a
    /// finalized block's header and payload can still be inspected.
    pub fn retaining() -> Self {
        Self::build(true)
    }

    fn build(retain: bool) -> Self {
        Self {
            inner: SystemUpstream::new(),
            events: SegQueue::new(),
            allocations: AtomicCounter::new(),
            deallocations: AtomicCounter::new(),
            fail_next: AtomicUsize::new(0),
            retain,
            retained: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `count` allocations fail with out-of-memory.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Drain the recorded events in arrival order.
    pub fn take_events(&self) -> Vec<UpstreamEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }

    /// Blocks handed out so far.
    pub fn allocations(&self) -> u64 {
        self.allocations.get()
    }

    /// Blocks returned so far.
    pub fn deallocations(&self) -> u64 {
        self.deallocations.get()
    }

    fn should_fail(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for RecordingUpstream {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl UpstreamAllocator for RecordingUpstream {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError> {
        if self.should_fail() {
            return Err(PoisonError::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            });
        }

        let ptr = self.inner.allocate(layout)?;
        self.allocations.increment();
        self.events.push(UpstreamEvent::Allocate {
            address: ptr.as_ptr() as usize,
            layout,
        });
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let bytes = std::slice::from_raw_parts(ptr.as_ptr(), layout.size()).to_vec();
        self.deallocations.increment();
        self.events.push(UpstreamEvent::Deallocate {
            address: ptr.as_ptr() as usize,
            layout,
            bytes,
        });

        if self.retain {
            self.retained.lock().push((ptr.as_ptr() as usize, layout));
        } else {
            self.inner.deallocate(ptr, layout);
        }
    }
}

impl Drop for RecordingUpstream {
    fn drop(&mut self) {
        for (address, layout) in self.retained.lock().drain(..) {
            // SAFETY: retained blocks came from `inner` and were never freed
            unsafe { self.inner.deallocate(NonNull::new_unchecked(address as *mut u8), layout) };
        }
    }
}
