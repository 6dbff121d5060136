//! Geometry of an allocation block: `[padding][header][payload]`.

use std::alloc::Layout;
use std::mem;
use std::ptr::NonNull;

use crate::api::error::PoisonError;
use crate::core::header::{BlockHeader, HEADER_SIZE};
use crate::util::layout::align_up;

/// Offset of the payload inside a block whose upstream alignment is
/// `block_align`.
#[inline]
pub(crate) const fn payload_offset(block_align: usize) -> usize {
    align_up(HEADER_SIZE, block_align)
}

/// Upstream layout and payload placement for one `(size, align)` request.
///
/// The header always ends exactly where the payload starts. When `align` is
/// no larger than [`HEADER_SIZE`] the block is `HEADER_SIZE + size` bytes;
/// larger alignments insert padding in front of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    payload: Layout,
    block: Layout,
    payload_offset: usize,
}

impl BlockLayout {
    /// Compute the block layout for a payload of `size` bytes at `align`.
    pub fn new(size: usize, align: usize) -> Result<Self, PoisonError> {
        let payload = Layout::from_size_align(size, align)
            .map_err(|_| PoisonError::InvalidLayout { size, align })?;
        Self::from_layout(payload)
    }

    /// Compute the block layout for an existing payload layout.
    pub fn from_layout(payload: Layout) -> Result<Self, PoisonError> {
        let invalid = PoisonError::InvalidLayout {
            size: payload.size(),
            align: payload.align(),
        };

        let block_align = payload.align().max(mem::align_of::<BlockHeader>());
        let offset = payload_offset(block_align);
        let total = offset.checked_add(payload.size()).ok_or(invalid.clone())?;
        let block = Layout::from_size_align(total, block_align).map_err(|_| invalid)?;

        Ok(Self {
            payload,
            block,
            payload_offset: offset,
        })
    }

    /// Layout requested from the upstream allocator.
    pub fn block(&self) -> Layout {
        self.block
    }

    /// Layout of the caller-visible payload.
    pub fn payload(&self) -> Layout {
        self.payload
    }

    /// Distance from the start of the block to the payload.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Payload pointer for a block starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a block allocated with [`BlockLayout::block`].
    pub(crate) unsafe fn payload_of(&self, base: NonNull<u8>) -> NonNull<u8> {
        NonNull::new_unchecked(base.as_ptr().add(self.payload_offset))
    }

    /// Block start for a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must come from [`BlockLayout::payload_of`] with this layout.
    pub(crate) unsafe fn base_of(&self, payload: NonNull<u8>) -> NonNull<u8> {
        NonNull::new_unchecked(payload.as_ptr().sub(self.payload_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_alignment_has_no_padding() {
        let layout = BlockLayout::new(64, 8).unwrap();
        assert_eq!(layout.payload_offset(), HEADER_SIZE);
        assert_eq!(layout.block().size(), HEADER_SIZE + 64);
        assert_eq!(layout.block().align(), mem::align_of::<BlockHeader>());
    }

    #[test]
    fn test_byte_alignment_uses_header_alignment() {
        let layout = BlockLayout::new(3, 1).unwrap();
        assert_eq!(layout.block().align(), mem::align_of::<usize>());
        assert_eq!(layout.payload().align(), 1);
        assert_eq!(layout.block().size(), HEADER_SIZE + 3);
    }

    #[test]
    fn test_large_alignment_pads_before_header() {
        let layout = BlockLayout::new(10, 256).unwrap();
        assert_eq!(layout.payload_offset(), 256);
        assert_eq!(layout.block().align(), 256);
        assert_eq!(layout.block().size(), 266);
        assert!(layout.payload_offset() >= HEADER_SIZE);
    }

    #[test]
    fn test_zero_size_still_reserves_header() {
        let layout = BlockLayout::new(0, 8).unwrap();
        assert_eq!(layout.block().size(), HEADER_SIZE);
    }

    #[test]
    fn test_rejects_bad_alignment() {
        assert_eq!(
            BlockLayout::new(8, 3),
            Err(PoisonError::InvalidLayout { size: 8, align: 3 })
        );
        assert!(BlockLayout::new(8, 0).is_err());
    }

    #[test]
    fn test_rejects_overflowing_size() {
        assert!(BlockLayout::new(usize::MAX - 4, 8).is_err());
        assert!(BlockLayout::new(isize::MAX as usize, 8).is_err());
    }
}
