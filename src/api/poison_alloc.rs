//! The reference-counted poisoning allocator.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

use crate::allocators::upstream::{SystemUpstream, UpstreamAllocator};
use crate::api::config::PoisonConfig;
use crate::api::error::PoisonError;
use crate::api::stats::{Counters, PoisonStats};
use crate::api::wrappers::PoisonBox;
use crate::core::block::BlockLayout;
use crate::core::header::{BlockHeader, BlockState, OwnerRelease, RefRelease};
use crate::core::poison::{looks_finalized, poison_region};
use crate::diagnostics::{self, Diagnostic};
use crate::util::layout::is_aligned;
use crate::util::size::format_bytes;

#[cfg(feature = "debug")]
use crate::debug::backtrace::{BlockTrace, BlockTracker};

/// An allocator that defers the real free until every [`SafeHandle`] to a
/// block is gone, and poisons the payload before returning it upstream.
///
/// Each block carries a hidden header right before the payload. The owner
/// holds one implicit reference from `allocate` until `deallocate`; every
/// handle holds one more. Whichever release brings the count to zero after
/// the owner has deallocated overwrites the payload with
/// [`POISON_BYTE`](crate::POISON_BYTE) and hands the block back to the
/// upstream allocator.
///
/// # Example
///
/// ```rust
/// use poisonalloc::{PoisonAllocator, SafeHandle};
///
/// let alloc = PoisonAllocator::new();
/// let ptr = alloc.allocate(8, 8).unwrap().cast::<u64>();
/// unsafe { ptr.as_ptr().write(7) };
///
/// let handle = unsafe { SafeHandle::new(&alloc, ptr.as_ptr()) };
/// unsafe { alloc.deallocate(ptr.cast(), 8, 8) };
///
/// // Quarantined: still readable through the handle.
/// assert_eq!(*handle, 7);
/// drop(handle); // poisoned and released here
/// ```
///
/// [`SafeHandle`]: crate::SafeHandle
pub struct PoisonAllocator<U: UpstreamAllocator = SystemUpstream> {
    upstream: U,
    config: PoisonConfig,
    counters: Counters,
    #[cfg(feature = "debug")]
    tracker: BlockTracker,
}

impl PoisonAllocator<SystemUpstream> {
    /// Poisoning allocator over the system allocator with default config.
    pub const fn new() -> Self {
        Self::with_upstream_and_config(SystemUpstream::new(), PoisonConfig::DEFAULT)
    }

    /// Poisoning allocator over the system allocator.
    pub const fn with_config(config: PoisonConfig) -> Self {
        Self::with_upstream_and_config(SystemUpstream::new(), config)
    }
}

impl Default for PoisonAllocator<SystemUpstream> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: UpstreamAllocator> PoisonAllocator<U> {
    /// Wrap `upstream` with the default config.
    pub const fn with_upstream(upstream: U) -> Self {
        Self::with_upstream_and_config(upstream, PoisonConfig::DEFAULT)
    }

    /// Wrap `upstream` with an explicit config.
    pub const fn with_upstream_and_config(upstream: U, config: PoisonConfig) -> Self {
        Self {
            upstream,
            config,
            counters: Counters::new(),
            #[cfg(feature = "debug")]
            tracker: BlockTracker::new(),
        }
    }

    /// The allocator supplying block storage.
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoisonConfig {
        &self.config
    }

    /// Snapshot the allocation counters.
    pub fn stats(&self) -> PoisonStats {
        self.counters.snapshot()
    }

    /// Allocate `size` payload bytes aligned to `align`.
    ///
    /// A zero `size` still reserves a header and returns a unique, aligned,
    /// non-dereferenceable pointer that must be deallocated like any other.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, PoisonError> {
        self.allocate_block(BlockLayout::new(size, align)?)
    }

    /// Allocate a payload described by `layout`.
    pub fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>, PoisonError> {
        self.allocate_block(BlockLayout::from_layout(layout)?)
    }

    /// Allocate and initialize a value, returning its owner.
    ///
    /// Payloads may be read through handles after the owner drops, and
    /// destructors never run on them, hence `T: Copy`.
    pub fn alloc_value<T: Copy>(&self, value: T) -> Result<PoisonBox<'_, T, U>, PoisonError> {
        let ptr = self.allocate_layout(Layout::new::<T>())?.cast::<T>();

        // SAFETY: freshly allocated, sized and aligned for T
        unsafe {
            ptr.as_ptr().write(value);
            Ok(PoisonBox::from_raw(ptr, self))
        }
    }

    fn allocate_block(&self, layout: BlockLayout) -> Result<NonNull<u8>, PoisonError> {
        let payload_layout = layout.payload();
        let (size, align) = (payload_layout.size(), payload_layout.align());

        let base = self
            .upstream
            .allocate(layout.block())
            .map_err(|_| PoisonError::OutOfMemory { size, align })?;

        // SAFETY: the payload offset is at least HEADER_SIZE and a multiple of
        // the header alignment, so the header fits right before the payload.
        let payload = unsafe {
            let payload = layout.payload_of(base);
            BlockHeader::init(payload, size, align);
            payload
        };

        self.counters.record_allocate(size);

        #[cfg(feature = "debug")]
        self.tracker.record_alloc(payload.as_ptr() as usize, size);

        Ok(payload)
    }

    /// Give up the owner's reference to a block.
    ///
    /// With no handles outstanding the payload is poisoned and the block
    /// returned upstream immediately. Otherwise the block is quarantined
    /// until the last handle drops.
    ///
    /// # Safety
    ///
    /// `ptr`, `size` and `align` must match a prior `allocate` on this
    /// allocator, and the block must not have been deallocated yet. With
    /// `verify_deallocate` enabled, a mismatch or a repeated call on a
    /// quarantined block is reported and panics.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let header = BlockHeader::from_payload(ptr);
        if self.config.verify_deallocate {
            self.verify_deallocate(ptr, header, size, align);
        }

        if self.release_owned(ptr, header).is_err() && self.config.verify_deallocate {
            self.violation(&diagnostics::PA002, ptr, "the freed flag is already set");
        }
    }

    /// Give up the owner's reference, reporting a contract violation as an
    /// error instead of panicking.
    ///
    /// The header is always checked, whatever the config says. Nothing is
    /// changed when an error is returned.
    ///
    /// # Safety
    ///
    /// The header in front of `ptr` must be readable: either the block is
    /// still live or quarantined, or the upstream allocator keeps released
    /// storage mapped.
    pub unsafe fn try_deallocate(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
    ) -> Result<(), PoisonError> {
        let header = BlockHeader::from_payload(ptr);
        if !header.is_intact() {
            return Err(PoisonError::ContractViolation("deallocate of a released block"));
        }
        if header.size() != size || header.align() != align {
            return Err(PoisonError::ContractViolation(
                "size or alignment mismatch on deallocate",
            ));
        }

        self.release_owned(ptr, header)
    }

    unsafe fn release_owned(
        &self,
        ptr: NonNull<u8>,
        header: &BlockHeader,
    ) -> Result<(), PoisonError> {
        // Once the owner's reference is gone a racing handle may finalize the
        // block, so nothing below may touch the header after release_owner.
        let recorded_size = header.size();

        #[cfg(feature = "debug")]
        let sequence = self.tracker.sequence_of(ptr.as_ptr() as usize);

        match header.release_owner() {
            OwnerRelease::Finalize => {
                self.counters.record_deallocate();
                self.finalize(ptr);
                Ok(())
            }
            OwnerRelease::Quarantined { refs } => {
                self.counters.record_deallocate();
                self.counters.record_quarantine(recorded_size);

                #[cfg(feature = "debug")]
                if let Some(sequence) = sequence {
                    self.tracker.record_quarantine(ptr.as_ptr() as usize, sequence, refs);
                }
                #[cfg(not(feature = "debug"))]
                let _ = refs;

                Ok(())
            }
            OwnerRelease::Rejected => Err(PoisonError::ContractViolation("double deallocate")),
        }
    }

    /// [`deallocate`](Self::deallocate) with the allocation's layout.
    ///
    /// # Safety
    ///
    /// Same contract as [`deallocate`](Self::deallocate).
    pub unsafe fn deallocate_layout(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocate(ptr, layout.size(), layout.align())
    }

    /// Reference state of a block that has not been finalized.
    ///
    /// # Safety
    ///
    /// `ptr` must be the payload of a block from this allocator that is
    /// still live or quarantined.
    pub unsafe fn block_state(&self, ptr: NonNull<u8>) -> BlockState {
        BlockHeader::from_payload(ptr).state()
    }

    /// Quarantined blocks with their allocation backtraces.
    #[cfg(feature = "debug")]
    pub fn quarantine_report(&self) -> Vec<BlockTrace> {
        self.tracker.collect(true)
    }

    /// Blocks never deallocated by their owner, with allocation backtraces.
    #[cfg(feature = "debug")]
    pub fn leak_report(&self) -> Vec<BlockTrace> {
        self.tracker.collect(false)
    }

    unsafe fn verify_deallocate(
        &self,
        ptr: NonNull<u8>,
        header: &BlockHeader,
        size: usize,
        align: usize,
    ) {
        if !header.is_intact() {
            self.violation(
                &diagnostics::PA002,
                ptr,
                "header canary is gone (already finalized or not from this allocator)",
            );
        }

        if header.size() != size || header.align() != align {
            let detail = format!(
                "allocated as {} bytes align {}, deallocated as {} bytes align {}",
                header.size(),
                header.align(),
                size,
                align
            );
            self.violation(&diagnostics::PA003, ptr, &detail);
        }
    }

    /// Poison the payload and return the whole block upstream.
    ///
    /// # Safety
    ///
    /// The caller observed the reference count reach zero with the freed
    /// flag set; no other reference to the block exists.
    unsafe fn finalize(&self, payload: NonNull<u8>) {
        let header = BlockHeader::from_payload(payload);
        let size = header.size();

        let layout = match BlockLayout::new(size, header.align()) {
            Ok(layout) => layout,
            Err(_) => self.violation(&diagnostics::PA901, payload, "recorded layout is invalid"),
        };

        poison_region(payload.as_ptr(), size);
        header.mark_released();

        self.counters.record_finalize(size);

        #[cfg(feature = "debug")]
        self.tracker.record_release(payload.as_ptr() as usize);

        self.upstream.deallocate(layout.base_of(payload), layout.block());
    }

    /// Validate a block before a new handle references it.
    ///
    /// # Safety
    ///
    /// `payload` must point just past a readable header.
    pub(crate) unsafe fn check_reference(
        &self,
        payload: NonNull<u8>,
        target: Layout,
    ) -> Result<(), &'static Diagnostic> {
        let header = BlockHeader::from_payload(payload);
        if !header.is_intact() {
            return Err(&diagnostics::PA001);
        }

        match header.state() {
            BlockState::PendingRelease { .. } => return Err(&diagnostics::PA005),
            BlockState::Live { refs: 0 } => return Err(&diagnostics::PA001),
            BlockState::Live { .. } => {}
        }

        if target.size() > header.size() || !is_aligned(payload.as_ptr(), target.align()) {
            return Err(&diagnostics::PA006);
        }

        Ok(())
    }

    /// Take a handle reference on a block.
    ///
    /// # Safety
    ///
    /// The block must be held by its owner or by another handle.
    pub(crate) unsafe fn acquire(&self, payload: NonNull<u8>) {
        BlockHeader::from_payload(payload).acquire();
        self.counters.record_handle();
    }

    /// Drop a handle reference, finalizing the block if it was the last.
    ///
    /// # Safety
    ///
    /// The caller must own one handle reference on the block.
    pub(crate) unsafe fn release(&self, payload: NonNull<u8>) {
        let header = BlockHeader::from_payload(payload);
        let size = header.size();

        if header.release_ref() == RefRelease::Finalize {
            self.counters.record_leave_quarantine(size);
            self.finalize(payload);
        }
    }

    /// Check that a block is still unfinalized before its payload is read.
    ///
    /// # Safety
    ///
    /// `payload` must point just past a readable header and be valid for
    /// reads of `len` bytes.
    pub(crate) unsafe fn check_access(&self, payload: NonNull<u8>, len: usize) {
        let header = BlockHeader::from_payload(payload);
        if header.is_intact() {
            return;
        }

        let detail = if looks_finalized(payload.as_ptr(), len) {
            "payload carries the poison pattern"
        } else {
            "header canary was overwritten"
        };
        self.violation(&diagnostics::PA004, payload, detail);
    }

    /// Report a contract violation on `payload` and panic.
    #[cold]
    #[track_caller]
    pub(crate) fn violation(&self, diag: &Diagnostic, payload: NonNull<u8>, detail: &str) -> ! {
        let address = payload.as_ptr() as usize;

        #[cfg(feature = "debug")]
        if let Some(trace) = self.tracker.get(address) {
            let context = format!(
                "block 0x{:x}: {}\nallocated (#{}) at:\n{}",
                address, detail, trace.sequence, trace.backtrace
            );
            diagnostics::fatal(diag, &context);
        }

        diagnostics::fatal(diag, &format!("block 0x{:x}: {}", address, detail))
    }

    fn report_outstanding(&self) {
        let stats = self.stats();

        if stats.quarantined > 0 {
            crate::pa_emit!(
                PA101,
                "{} blocks ({}) still referenced by leaked handles",
                stats.quarantined,
                format_bytes(stats.quarantined_bytes)
            );
        }

        if stats.owned_blocks() > 0 {
            crate::pa_emit!(
                PA102,
                "{} blocks ({}) never deallocated",
                stats.owned_blocks(),
                format_bytes(stats.live_bytes.saturating_sub(stats.quarantined_bytes))
            );
        }

        #[cfg(feature = "debug")]
        if stats.live_blocks > 0 {
            self.tracker.print_report();
        }

        #[cfg(feature = "log")]
        log::debug!(
            "poison allocator dropped: {} allocations, {} finalized, peak {}",
            stats.allocations,
            stats.finalized,
            format_bytes(stats.peak_bytes)
        );
    }
}

impl<U: UpstreamAllocator> Drop for PoisonAllocator<U> {
    fn drop(&mut self) {
        if self.config.report_on_drop {
            self.report_outstanding();
        }
    }
}

impl<U: UpstreamAllocator> fmt::Debug for PoisonAllocator<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoisonAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::HEADER_SIZE;
    use crate::core::poison::POISON_BYTE;
    use crate::api::handle::SafeHandle;
    use crate::testing::{RecordingUpstream, UpstreamEvent};

    #[cfg(feature = "debug")]
    use crate::debug::TraceState;

    fn recording() -> PoisonAllocator<RecordingUpstream> {
        PoisonAllocator::with_upstream_and_config(
            RecordingUpstream::new(),
            PoisonConfig::diagnostic(),
        )
    }

    #[test]
    fn test_allocate_requests_header_plus_payload() {
        let alloc = recording();
        let ptr = alloc.allocate(64, 8).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);

        match alloc.upstream().take_events().as_slice() {
            [UpstreamEvent::Allocate { address, layout }] => {
                assert_eq!(layout.size(), HEADER_SIZE + 64);
                assert_eq!(*address + HEADER_SIZE, ptr.as_ptr() as usize);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        unsafe { alloc.deallocate(ptr, 64, 8) };
    }

    #[test]
    fn test_fresh_block_is_live_with_owner_reference() {
        let alloc = recording();
        let ptr = alloc.allocate(16, 4).unwrap();
        assert_eq!(unsafe { alloc.block_state(ptr) }, BlockState::Live { refs: 1 });
        unsafe { alloc.deallocate(ptr, 16, 4) };
    }

    #[test]
    fn test_deallocate_without_handles_poisons_and_releases() {
        let alloc = recording();
        let ptr = alloc.allocate(32, 8).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0x11, 32) };
        alloc.upstream().take_events();

        unsafe { alloc.deallocate(ptr, 32, 8) };

        let events = alloc.upstream().take_events();
        assert_eq!(events.len(), 1);
        let payload = events[0].payload().unwrap();
        assert_eq!(payload.len(), 32);
        assert!(payload.iter().all(|&b| b == POISON_BYTE));

        let stats = alloc.stats();
        assert_eq!(stats.finalized, 1);
        assert_eq!(stats.live_blocks, 0);
    }

    #[test]
    fn test_out_of_memory_is_propagated() {
        let alloc = recording();
        alloc.upstream().fail_next(1);
        assert_eq!(
            alloc.allocate(128, 16),
            Err(PoisonError::OutOfMemory { size: 128, align: 16 })
        );
        assert_eq!(alloc.stats().allocations, 0);

        let ptr = alloc.allocate(128, 16).unwrap();
        unsafe { alloc.deallocate(ptr, 128, 16) };
    }

    #[test]
    fn test_invalid_alignment_never_reaches_upstream() {
        let alloc = recording();
        assert_eq!(
            alloc.allocate(8, 6),
            Err(PoisonError::InvalidLayout { size: 8, align: 6 })
        );
        assert!(alloc.upstream().take_events().is_empty());
    }

    #[test]
    fn test_alloc_value_box_round_trip() {
        let alloc = recording();
        {
            let boxed = alloc.alloc_value([3u32; 4]).unwrap();
            assert_eq!(boxed[2], 3);
            assert_eq!(alloc.stats().live_bytes, 16);
        }
        assert_eq!(alloc.stats().finalized, 1);
    }

    #[test]
    #[should_panic(expected = "PA003")]
    fn test_mismatched_size_is_fatal() {
        let alloc = recording();
        let ptr = alloc.allocate(64, 8).unwrap();
        unsafe { alloc.deallocate(ptr, 32, 8) };
    }

    #[test]
    #[should_panic(expected = "PA003")]
    fn test_mismatched_alignment_is_fatal() {
        let alloc = recording();
        let ptr = alloc.allocate(64, 16).unwrap();
        unsafe { alloc.deallocate(ptr, 64, 8) };
    }

    #[test]
    fn test_try_deallocate_reports_violations() {
        let alloc = PoisonAllocator::with_upstream_and_config(
            RecordingUpstream::retaining(),
            PoisonConfig::release(),
        );

        let ptr = alloc.allocate(24, 8).unwrap();
        assert!(matches!(
            unsafe { alloc.try_deallocate(ptr, 16, 8) },
            Err(PoisonError::ContractViolation(_))
        ));
        assert_eq!(unsafe { alloc.block_state(ptr) }, BlockState::Live { refs: 1 });

        assert_eq!(unsafe { alloc.try_deallocate(ptr, 24, 8) }, Ok(()));
        assert!(matches!(
            unsafe { alloc.try_deallocate(ptr, 24, 8) },
            Err(PoisonError::ContractViolation(_))
        ));
        assert_eq!(alloc.stats().deallocations, 1);
    }

    #[test]
    fn test_double_deallocate_of_quarantined_block_changes_nothing() {
        let alloc = recording();
        let ptr = alloc.allocate(16, 8).unwrap();
        unsafe { ptr.cast::<u64>().as_ptr().write(1) };
        let handle = unsafe { SafeHandle::new(&alloc, ptr.cast::<u64>().as_ptr()) };

        unsafe { alloc.deallocate(ptr, 16, 8) };
        assert!(matches!(
            unsafe { alloc.try_deallocate(ptr, 16, 8) },
            Err(PoisonError::ContractViolation(_))
        ));
        assert_eq!(
            unsafe { alloc.block_state(ptr) },
            BlockState::PendingRelease { refs: 1 }
        );
        assert_eq!(alloc.stats().deallocations, 1);

        #[cfg(feature = "debug")]
        assert_eq!(
            alloc.quarantine_report()[0].state,
            TraceState::Quarantined { refs: 1 }
        );

        drop(handle);
        assert_eq!(alloc.stats().finalized, 1);
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_reports_follow_quarantine_and_leaks() {
        let alloc = recording();
        let quarantined = alloc.allocate(16, 8).unwrap();
        let owned = alloc.allocate(32, 8).unwrap();
        unsafe { quarantined.cast::<u64>().as_ptr().write(1) };

        let handle = unsafe { SafeHandle::new(&alloc, quarantined.cast::<u64>().as_ptr()) };
        unsafe { alloc.deallocate(quarantined, 16, 8) };

        let report = alloc.quarantine_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].address, quarantined.as_ptr() as usize);
        assert_eq!(report[0].state, TraceState::Quarantined { refs: 1 });
        assert!(!report[0].backtrace.is_empty());

        let leaks = alloc.leak_report();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].size, 32);

        drop(handle);
        unsafe { alloc.deallocate(owned, 32, 8) };
        assert!(alloc.quarantine_report().is_empty());
        assert!(alloc.leak_report().is_empty());
    }

    #[cfg(feature = "debug")]
    #[test]
    #[should_panic(expected = "allocated (#")]
    fn test_violation_names_allocation_site() {
        let alloc = recording();
        let ptr = alloc.allocate(64, 8).unwrap();
        unsafe { alloc.deallocate(ptr, 48, 8) };
    }

    #[test]
    fn test_debug_output_names_allocator() {
        let alloc = recording();
        let text = format!("{:?}", alloc);
        assert!(text.starts_with("PoisonAllocator"));
    }
}
