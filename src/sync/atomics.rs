//! Atomic helpers for allocator statistics.
//!
//! These never order anything: block lifetimes are governed by the header's
//! state word, not by these counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A monotonically increasing event counter.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A gauge for values that go up and down (live bytes, quarantined blocks).
///
/// Updates wrap instead of panicking: a release recorded by one thread can
/// land before the matching quarantine recorded by another, so a reading
/// taken in that window is transiently off.
pub struct AtomicGauge(AtomicUsize);

impl AtomicGauge {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Add to the gauge, returning the new value.
    pub fn add(&self, value: usize) -> usize {
        self.0.fetch_add(value, Ordering::Relaxed).wrapping_add(value)
    }

    /// Subtract from the gauge, returning the new value.
    pub fn sub(&self, value: usize) -> usize {
        self.0.fetch_sub(value, Ordering::Relaxed).wrapping_sub(value)
    }

    /// Current value, clamped to zero while a racing update is in flight.
    pub fn get(&self) -> usize {
        let value = self.0.load(Ordering::Relaxed);
        if value > isize::MAX as usize {
            0
        } else {
            value
        }
    }

    /// Raise the gauge to `value` if it is higher (high-water marks).
    pub fn update_max(&self, value: usize) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

impl Default for AtomicGauge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let counter = AtomicCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge_tracks_current_and_peak() {
        let gauge = AtomicGauge::new();
        let peak = AtomicGauge::new();

        peak.update_max(gauge.add(100));
        peak.update_max(gauge.add(50));
        assert_eq!(gauge.sub(120), 30);
        peak.update_max(gauge.get());

        assert_eq!(gauge.get(), 30);
        assert_eq!(peak.get(), 150);
    }

    #[test]
    fn test_gauge_transient_underflow_reads_zero() {
        let gauge = AtomicGauge::new();
        gauge.sub(8);
        assert_eq!(gauge.get(), 0);
        gauge.add(8);
        assert_eq!(gauge.get(), 0);
        gauge.add(4);
        assert_eq!(gauge.get(), 4);
    }
}
