//! Error type for the poisoning allocator.

use std::fmt;

/// Errors surfaced by allocation and checked handle construction.
///
/// Only `OutOfMemory` and `InvalidLayout` are ordinary runtime failures.
/// The other variants report caller contract violations; the unchecked
/// paths treat them as fatal in diagnostic builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonError {
    /// The upstream allocator could not supply the block.
    OutOfMemory { size: usize, align: usize },
    /// Alignment is not a power of two, or header plus payload overflows.
    InvalidLayout { size: usize, align: usize },
    /// A handle was requested for a null, released, or already deallocated
    /// block, or for a type that does not fit the payload.
    InvalidReference,
    /// A caller broke the allocate/deallocate contract.
    ContractViolation(&'static str),
}

impl fmt::Display for PoisonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoisonError::OutOfMemory { size, align } => {
                write!(f, "upstream allocator out of memory ({} bytes, align {})", size, align)
            }
            PoisonError::InvalidLayout { size, align } => {
                write!(f, "invalid allocation layout ({} bytes, align {})", size, align)
            }
            PoisonError::InvalidReference => {
                write!(f, "handle constructed from an invalid or released block")
            }
            PoisonError::ContractViolation(what) => {
                write!(f, "allocator contract violation: {}", what)
            }
        }
    }
}

impl std::error::Error for PoisonError {}
