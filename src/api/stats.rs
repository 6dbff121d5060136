//! Allocation statistics.

use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::util::size::format_bytes;

/// Snapshot of a poisoning allocator's counters.
///
/// Fields are read independently with relaxed loads, so a snapshot taken
/// while other threads allocate is only approximately consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoisonStats {
    /// Successful allocate calls.
    pub allocations: u64,
    /// Owner deallocate calls (quarantined or finalized).
    pub deallocations: u64,
    /// Blocks poisoned and returned upstream.
    pub finalized: u64,
    /// Blocks deallocated by their owner but still held by handles.
    pub quarantined: usize,
    /// Blocks not yet finalized (live and quarantined).
    pub live_blocks: usize,
    /// Payload bytes not yet finalized.
    pub live_bytes: usize,
    /// Payload bytes held only by handles.
    pub quarantined_bytes: usize,
    /// High-water mark of `live_bytes`.
    pub peak_bytes: usize,
    /// References taken by handle construction and cloning.
    pub handles_acquired: u64,
}

impl PoisonStats {
    /// Blocks whose owner has not deallocated yet.
    pub fn owned_blocks(&self) -> usize {
        self.live_blocks.saturating_sub(self.quarantined)
    }
}

impl std::fmt::Display for PoisonStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Poison Allocator Statistics:")?;
        writeln!(f, "  Allocations:     {}", self.allocations)?;
        writeln!(f, "  Deallocations:   {}", self.deallocations)?;
        writeln!(f, "  Finalized:       {}", self.finalized)?;
        writeln!(
            f,
            "  Live blocks:     {} ({})",
            self.live_blocks,
            format_bytes(self.live_bytes)
        )?;
        writeln!(
            f,
            "  Quarantined:     {} ({})",
            self.quarantined,
            format_bytes(self.quarantined_bytes)
        )?;
        writeln!(f, "  Peak:            {}", format_bytes(self.peak_bytes))?;
        writeln!(f, "  Handles taken:   {}", self.handles_acquired)?;
        Ok(())
    }
}

/// Live counters behind [`PoisonStats`].
pub(crate) struct Counters {
    allocations: AtomicCounter,
    deallocations: AtomicCounter,
    finalized: AtomicCounter,
    handles_acquired: AtomicCounter,
    quarantined: AtomicGauge,
    live_blocks: AtomicGauge,
    live_bytes: AtomicGauge,
    quarantined_bytes: AtomicGauge,
    peak_bytes: AtomicGauge,
}

impl Counters {
    pub(crate) const fn new() -> Self {
        Self {
            allocations: AtomicCounter::new(),
            deallocations: AtomicCounter::new(),
            finalized: AtomicCounter::new(),
            handles_acquired: AtomicCounter::new(),
            quarantined: AtomicGauge::new(),
            live_blocks: AtomicGauge::new(),
            live_bytes: AtomicGauge::new(),
            quarantined_bytes: AtomicGauge::new(),
            peak_bytes: AtomicGauge::new(),
        }
    }

    pub(crate) fn record_allocate(&self, size: usize) {
        self.allocations.increment();
        self.live_blocks.add(1);
        let live = self.live_bytes.add(size);
        self.peak_bytes.update_max(live);
    }

    pub(crate) fn record_deallocate(&self) {
        self.deallocations.increment();
    }

    pub(crate) fn record_quarantine(&self, size: usize) {
        self.quarantined.add(1);
        self.quarantined_bytes.add(size);
    }

    pub(crate) fn record_leave_quarantine(&self, size: usize) {
        self.quarantined.sub(1);
        self.quarantined_bytes.sub(size);
    }

    pub(crate) fn record_finalize(&self, size: usize) {
        self.finalized.increment();
        self.live_blocks.sub(1);
        self.live_bytes.sub(size);
    }

    pub(crate) fn record_handle(&self) {
        self.handles_acquired.increment();
    }

    pub(crate) fn snapshot(&self) -> PoisonStats {
        PoisonStats {
            allocations: self.allocations.get(),
            deallocations: self.deallocations.get(),
            finalized: self.finalized.get(),
            quarantined: self.quarantined.get(),
            live_blocks: self.live_blocks.get(),
            live_bytes: self.live_bytes.get(),
            quarantined_bytes: self.quarantined_bytes.get(),
            peak_bytes: self.peak_bytes.get(),
            handles_acquired: self.handles_acquired.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarantine_round_trip() {
        let counters = Counters::new();
        counters.record_allocate(64);
        counters.record_deallocate();
        counters.record_quarantine(64);

        let stats = counters.snapshot();
        assert_eq!(stats.quarantined, 1);
        assert_eq!(stats.quarantined_bytes, 64);
        assert_eq!(stats.owned_blocks(), 0);

        counters.record_leave_quarantine(64);
        counters.record_finalize(64);

        let stats = counters.snapshot();
        assert_eq!(stats.quarantined, 0);
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.peak_bytes, 64);
        assert_eq!(stats.finalized, 1);
    }

    #[test]
    fn test_display_uses_readable_sizes() {
        let stats = PoisonStats {
            live_blocks: 2,
            live_bytes: 2048,
            ..PoisonStats::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Live blocks:     2 (2.00 KB)"));
    }
}
