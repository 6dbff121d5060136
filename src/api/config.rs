//! Allocator configuration.

/// Whether this build runs the diagnostic checks by default.
const DIAGNOSTIC_BUILD: bool = cfg!(any(debug_assertions, feature = "debug"));

/// Configuration for the poisoning allocator.
///
/// The checks only inspect headers of blocks that have not been returned
/// upstream yet, or that the upstream keeps readable. They are best-effort
/// detectors, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonConfig {
    /// Validate the header before a handle takes a reference
    /// (null, released, already deallocated, type too large or misaligned).
    pub verify_handles: bool,

    /// Check the header canary on every handle dereference.
    pub check_on_deref: bool,

    /// Check size/alignment and the freed flag on deallocate.
    pub verify_deallocate: bool,

    /// Report leaked and still-quarantined blocks when the allocator drops.
    pub report_on_drop: bool,
}

impl PoisonConfig {
    /// Build-dependent defaults: every check on in debug builds or with the
    /// `debug` feature.
    pub const DEFAULT: Self = Self {
        verify_handles: DIAGNOSTIC_BUILD,
        check_on_deref: DIAGNOSTIC_BUILD,
        verify_deallocate: DIAGNOSTIC_BUILD,
        report_on_drop: DIAGNOSTIC_BUILD,
    };

    /// No checks at all. Contract violations are undefined behaviour.
    pub const fn release() -> Self {
        Self {
            verify_handles: false,
            check_on_deref: false,
            verify_deallocate: false,
            report_on_drop: false,
        }
    }

    /// Every check on, regardless of build profile.
    pub const fn diagnostic() -> Self {
        Self {
            verify_handles: true,
            check_on_deref: true,
            verify_deallocate: true,
            report_on_drop: true,
        }
    }

    /// Builder pattern: validate handle construction.
    pub fn with_verify_handles(mut self, enable: bool) -> Self {
        self.verify_handles = enable;
        self
    }

    /// Builder pattern: check the canary on dereference.
    pub fn with_check_on_deref(mut self, enable: bool) -> Self {
        self.check_on_deref = enable;
        self
    }

    /// Builder pattern: validate deallocate calls.
    pub fn with_verify_deallocate(mut self, enable: bool) -> Self {
        self.verify_deallocate = enable;
        self
    }

    /// Builder pattern: report outstanding blocks on drop.
    pub fn with_report_on_drop(mut self, enable: bool) -> Self {
        self.report_on_drop = enable;
        self
    }
}

impl Default for PoisonConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
