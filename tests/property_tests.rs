//! Property-based tests for the poisoning allocator.
//!
//! Uses proptest to generate random layouts and handle counts and verify
//! that poisoning and deferred release hold for all of them.

use poisonalloc::testing::{RecordingUpstream, UpstreamEvent};
use poisonalloc::{is_poisoned, BlockState, PoisonAllocator, PoisonConfig, SafeHandle};
use proptest::prelude::*;

fn recording() -> PoisonAllocator<RecordingUpstream> {
    PoisonAllocator::with_upstream_and_config(RecordingUpstream::new(), PoisonConfig::diagnostic())
}

/// Strategy for payload sizes, biased towards the small end
fn payload_size() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..=64, 65usize..=4096]
}

/// Strategy for power-of-two alignments up to a page
fn alignment() -> impl Strategy<Value = usize> {
    (0u32..=12).prop_map(|shift| 1usize << shift)
}

fn returned(events: &[UpstreamEvent]) -> Vec<&UpstreamEvent> {
    events
        .iter()
        .filter(|e| matches!(e, UpstreamEvent::Deallocate { .. }))
        .collect()
}

proptest! {
    /// A block freed without handles goes back fully poisoned
    #[test]
    fn freed_payload_is_poisoned(
        size in payload_size(),
        align in alignment(),
        fill in any::<u8>(),
    ) {
        let alloc = recording();

        let ptr = alloc.allocate(size, align).unwrap();
        prop_assert_eq!(ptr.as_ptr() as usize % align, 0);
        unsafe {
            ptr.as_ptr().write_bytes(fill, size);
            alloc.deallocate(ptr, size, align);
        }

        let events = alloc.upstream().take_events();
        let returned = returned(&events);
        prop_assert_eq!(returned.len(), 1);

        let payload = returned[0].payload().unwrap();
        prop_assert_eq!(payload.len(), size);
        prop_assert!(is_poisoned(payload));
    }

    /// Every handle taken before deallocate keeps the block quarantined
    #[test]
    fn handles_defer_release(handles in 1usize..32, size in 8usize..256) {
        let alloc = recording();

        let ptr = alloc.allocate(size, 8).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0x42, size) };

        let mut taken: Vec<_> = (0..handles)
            .map(|_| unsafe { SafeHandle::new(&alloc, ptr.cast::<u8>().as_ptr()) })
            .collect();
        alloc.upstream().take_events();

        unsafe { alloc.deallocate(ptr, size, 8) };

        while let Some(handle) = taken.pop() {
            let remaining = taken.len() + 1;
            prop_assert_eq!(
                unsafe { alloc.block_state(ptr) },
                BlockState::PendingRelease { refs: remaining }
            );
            prop_assert_eq!(*handle, 0x42);
            prop_assert!(returned(&alloc.upstream().take_events()).is_empty());
            drop(handle);
        }

        let events = alloc.upstream().take_events();
        let returned = returned(&events);
        prop_assert_eq!(returned.len(), 1);
        prop_assert!(is_poisoned(returned[0].payload().unwrap()));
        prop_assert_eq!(alloc.stats().finalized, 1);
    }

    /// Counts observed through handles never drop below the live handles
    #[test]
    fn ref_count_tracks_clones(clones in 0usize..64) {
        let alloc = recording();
        let boxed = alloc.alloc_value(7u64).unwrap();

        let root = boxed.handle();
        let copies: Vec<_> = (0..clones).map(|_| root.clone()).collect();
        prop_assert_eq!(boxed.ref_count(), clones + 2);

        drop(copies);
        prop_assert_eq!(root.ref_count(), 2);
    }
}
