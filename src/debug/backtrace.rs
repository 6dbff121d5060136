//! Allocation backtrace tracking.
//!
//! Records where every unfinalized block was allocated so that shutdown
//! reports and contract violations can point at the allocation site.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::mutex::Mutex;

/// Where a tracked block is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    /// Owner still holds the block.
    Live,
    /// Owner deallocated; `refs` handles were outstanding at that moment.
    Quarantined { refs: usize },
}

/// A captured backtrace for a block.
#[derive(Debug, Clone)]
pub struct BlockTrace {
    /// Payload address
    pub address: usize,

    /// Payload size
    pub size: usize,

    /// Allocation sequence number
    pub sequence: u64,

    /// Lifecycle state at the last update
    pub state: TraceState,

    /// Captured backtrace of the allocate call
    pub backtrace: String,
}

/// Tracker for every block that has not been finalized.
pub(crate) struct BlockTracker {
    blocks: Mutex<BTreeMap<usize, BlockTrace>>,
    sequence: AtomicU64,
}

impl BlockTracker {
    pub(crate) const fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Record an allocation with its backtrace.
    pub(crate) fn record_alloc(&self, address: usize, size: usize) {
        let bt = backtrace::Backtrace::new();
        let trace = BlockTrace {
            address,
            size,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            state: TraceState::Live,
            backtrace: format!("{:?}", bt),
        };

        self.blocks.lock().insert(address, trace);
    }

    /// Allocation sequence number of the block tracked at `address`.
    pub(crate) fn sequence_of(&self, address: usize) -> Option<u64> {
        self.blocks.lock().get(&address).map(|t| t.sequence)
    }

    /// Mark a block as quarantined behind `refs` handles.
    ///
    /// Only the allocation numbered `sequence` is updated: by the time this
    /// runs a racing handle may have finalized the block and the address
    /// may belong to a new allocation.
    pub(crate) fn record_quarantine(&self, address: usize, sequence: u64, refs: usize) {
        if let Some(trace) = self.blocks.lock().get_mut(&address) {
            if trace.sequence == sequence {
                trace.state = TraceState::Quarantined { refs };
            }
        }
    }

    /// Forget a finalized block.
    pub(crate) fn record_release(&self, address: usize) {
        self.blocks.lock().remove(&address);
    }

    /// Trace for an address, if it is still tracked.
    pub(crate) fn get(&self, address: usize) -> Option<BlockTrace> {
        self.blocks.lock().get(&address).cloned()
    }

    /// All tracked blocks in the given state class.
    pub(crate) fn collect(&self, quarantined: bool) -> Vec<BlockTrace> {
        self.blocks
            .lock()
            .values()
            .filter(|t| matches!(t.state, TraceState::Quarantined { .. }) == quarantined)
            .cloned()
            .collect()
    }

    /// Print every outstanding block with its allocation site.
    pub(crate) fn print_report(&self) {
        let blocks = self.blocks.lock();
        if blocks.is_empty() {
            return;
        }

        eprintln!("[poisonalloc] {} unfinalized blocks:", blocks.len());
        for trace in blocks.values() {
            eprintln!(
                "  #{} 0x{:x}, {} bytes, {:?}",
                trace.sequence, trace.address, trace.size, trace.state
            );
            eprintln!("{}", trace.backtrace);
        }
    }
}
