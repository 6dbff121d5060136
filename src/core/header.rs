//! In-band control block stored immediately before every payload.
//!
//! The freed flag and the reference count share one atomic word so that the
//! owner's deallocate (set flag, drop one reference) is a single
//! read-modify-write. Handles only ever add or subtract one.

use std::process;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// Top bit of the state word: set once the owner has deallocated.
const FREED_BIT: usize = 1 << (usize::BITS - 1);

/// Remaining bits of the state word hold the reference count.
const REF_MASK: usize = !FREED_BIT;

/// Counts above this abort the process, leaving headroom below `FREED_BIT`
/// for racing increments.
const MAX_REFS: usize = REF_MASK >> 1;

/// Canary written into every header when the block is handed out.
pub const HEADER_CANARY: usize = 0x5AFE_B10C;

/// Canary written into the header once finalization has begun.
pub const RELEASED_CANARY: usize = 0xDEAD_B10C;

/// Size of the control block preceding each payload.
pub const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

/// Per-block control block.
#[repr(C)]
pub(crate) struct BlockHeader {
    state: AtomicUsize,
    size: usize,
    align: usize,
    canary: AtomicUsize,
}

/// Observable state of a block that has not been finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// The owner has not deallocated yet. `refs` includes the owner.
    Live { refs: usize },
    /// The owner has deallocated; `refs` handles are still outstanding.
    PendingRelease { refs: usize },
}

impl BlockState {
    /// Number of references currently held on the block.
    pub fn refs(&self) -> usize {
        match *self {
            BlockState::Live { refs } | BlockState::PendingRelease { refs } => refs,
        }
    }

    /// Whether the owner has already deallocated the block.
    pub fn is_pending_release(&self) -> bool {
        matches!(self, BlockState::PendingRelease { .. })
    }
}

/// Result of the owner giving up its implicit reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OwnerRelease {
    /// Handles remain; the block is quarantined.
    Quarantined { refs: usize },
    /// The owner held the last reference; the caller must finalize.
    Finalize,
    /// The freed flag was already set (double deallocate) or the count was
    /// already zero. Nothing was changed.
    Rejected,
}

/// Result of a handle giving up its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefRelease {
    Retained,
    /// Last reference of a freed block; the caller must finalize.
    Finalize,
}

impl BlockHeader {
    /// A fresh header holding the owner's implicit reference.
    pub(crate) const fn new(size: usize, align: usize) -> Self {
        Self {
            state: AtomicUsize::new(1),
            size,
            align,
            canary: AtomicUsize::new(HEADER_CANARY),
        }
    }

    /// Header of the block whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by a poisoning allocator and the
    /// block's storage must still be owned by the upstream allocator's
    /// caller (not yet returned).
    pub(crate) unsafe fn from_payload<'a>(payload: NonNull<u8>) -> &'a BlockHeader {
        &*(payload.as_ptr().sub(HEADER_SIZE) as *const BlockHeader)
    }

    /// Write a fresh header in front of `payload`.
    ///
    /// # Safety
    ///
    /// The `HEADER_SIZE` bytes before `payload` must be writable and aligned
    /// for `BlockHeader`.
    pub(crate) unsafe fn init(payload: NonNull<u8>, size: usize, align: usize) {
        let header = payload.as_ptr().sub(HEADER_SIZE) as *mut BlockHeader;
        header.write(BlockHeader::new(size, align));
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn align(&self) -> usize {
        self.align
    }

    /// Whether the canary still marks a block that has not been finalized.
    pub(crate) fn is_intact(&self) -> bool {
        self.canary.load(Ordering::Relaxed) == HEADER_CANARY
    }

    pub(crate) fn state(&self) -> BlockState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Take one more reference on behalf of a handle.
    pub(crate) fn acquire(&self) {
        // A new reference is always derived from an existing one (the owner's
        // or another handle's), so no ordering is needed here.
        let prev = self.state.fetch_add(1, Ordering::Relaxed);
        if prev & REF_MASK > MAX_REFS {
            process::abort();
        }
    }

    /// Set the freed flag and drop the owner's implicit reference.
    pub(crate) fn release_owner(&self) -> OwnerRelease {
        let update = self.state.fetch_update(Ordering::Release, Ordering::Relaxed, |state| {
            if state & FREED_BIT != 0 || state & REF_MASK == 0 {
                None
            } else {
                Some((state - 1) | FREED_BIT)
            }
        });

        match update {
            Ok(prev) if prev & REF_MASK == 1 => {
                atomic::fence(Ordering::Acquire);
                OwnerRelease::Finalize
            }
            Ok(prev) => OwnerRelease::Quarantined {
                refs: (prev & REF_MASK) - 1,
            },
            Err(_) => OwnerRelease::Rejected,
        }
    }

    /// Drop one handle reference.
    pub(crate) fn release_ref(&self) -> RefRelease {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev & REF_MASK != 0, "block reference count underflow");

        if prev == FREED_BIT | 1 {
            // Synchronizes with every earlier release so payload accesses
            // through other handles happen before the poison write.
            atomic::fence(Ordering::Acquire);
            RefRelease::Finalize
        } else {
            RefRelease::Retained
        }
    }

    /// Stamp the header as finalized. Only the finalizing thread calls this.
    pub(crate) fn mark_released(&self) {
        self.canary.store(RELEASED_CANARY, Ordering::Relaxed);
    }
}

fn decode(state: usize) -> BlockState {
    let refs = state & REF_MASK;
    if state & FREED_BIT != 0 {
        BlockState::PendingRelease { refs }
    } else {
        BlockState::Live { refs }
    }
}
