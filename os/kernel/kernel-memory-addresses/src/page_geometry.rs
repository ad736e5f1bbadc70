use crate::{PageFrameNumber, PhysicalAddress};

/// Page size fixed at boot, with the conversions derived from it.
///
/// ### Invariants
/// - `size` is a non-zero power of two and `size == 1 << shift`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageGeometry {
    size: u64,
    shift: u32,
}

impl PageGeometry {
    /// Returns `None` unless `size` is a non-zero power of two.
    #[must_use]
    pub const fn new(size: u64) -> Option<Self> {
        if !size.is_power_of_two() {
            return None;
        }
        Some(Self {
            size,
            shift: size.trailing_zeros(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        self.shift
    }

    /// Frame containing `addr`.
    #[inline]
    #[must_use]
    pub const fn frame_of(self, addr: PhysicalAddress) -> PageFrameNumber {
        PageFrameNumber::new(addr.as_u64() >> self.shift)
    }

    /// First byte of `pfn`.
    #[inline]
    #[must_use]
    pub const fn base_of(self, pfn: PageFrameNumber) -> PhysicalAddress {
        PhysicalAddress::new(pfn.as_u64() << self.shift)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, addr: PhysicalAddress) -> bool {
        addr.is_aligned_to(self.size)
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, addr: PhysicalAddress) -> PhysicalAddress {
        addr.align_up(self.size)
    }

    /// Bytes spanned by a block of `order` (`2^order` pages).
    #[inline]
    #[must_use]
    pub const fn block_size(self, order: u8) -> u64 {
        self.size << order
    }

    /// Address of the other half of `addr`'s order-`order + 1` parent block.
    ///
    /// `addr` must be aligned to [`block_size(order)`](Self::block_size).
    #[inline]
    #[must_use]
    pub const fn buddy_of(self, addr: PhysicalAddress, order: u8) -> PhysicalAddress {
        PhysicalAddress::new(addr.as_u64() ^ self.block_size(order))
    }

    /// Smallest order whose block holds `bytes` (at least one page).
    ///
    /// The size is rounded up to whole pages and then to the next power of two;
    /// the order is the trailing-zero distance to the page size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn order_for_size(self, bytes: u64) -> u8 {
        let pages = bytes.div_ceil(self.size);
        let pages = if pages == 0 { 1 } else { pages };
        pages.next_power_of_two().trailing_zeros() as u8
    }
}
