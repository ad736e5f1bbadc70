//! Memory zones and their per-order free areas.

use crate::bitmap::PairBitmap;
use crate::error::ZoneError;
use crate::free_list::{FreeBlocks, FreeList};
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PageFrameNumber, PageGeometry, PhysicalAddress};

/// Number of zones the manager tracks.
pub const ZONE_COUNT: usize = 2;

/// Identifies a zone. The discriminant is the value stored in page descriptors.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ZoneId {
    /// Kernel image and allocator metadata. Never allocated from.
    NoHeap = 0,
    /// Everything after the metadata, up to the end of RAM.
    Heap = 1,
}

impl ZoneId {
    pub const ALL: [Self; ZONE_COUNT] = [Self::NoHeap, Self::Heap];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::NoHeap,
            _ => Self::Heap,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ZoneId {
    type Error = ZoneError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoHeap),
            1 => Ok(Self::Heap),
            other => Err(ZoneError::NotFound(other)),
        }
    }
}

/// Free blocks of a single order plus the pair bitmap for that order.
pub struct FreeArea {
    order: u8,
    free: FreeList,
    pairs: PairBitmap,
}

impl FreeArea {
    pub(crate) const fn new(order: u8, pairs: PairBitmap) -> Self {
        Self {
            order,
            free: FreeList::new(),
            pairs,
        }
    }

    #[must_use]
    pub const fn order(&self) -> u8 {
        self.order
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub const fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Block addresses on the free list, most recently freed first.
    pub fn iter(&self) -> FreeBlocks<'_> {
        self.free.iter()
    }

    /// Pair bit covering `pfn`.
    ///
    /// # Panics
    /// If `pfn` lies outside the zone's bitmap.
    #[must_use]
    pub fn pair_bit(&self, pfn: PageFrameNumber) -> bool {
        self.pairs.test(pfn)
    }

    /// Raw pair bitmap words.
    #[must_use]
    pub const fn pair_words(&self) -> &[u64] {
        self.pairs.words()
    }

    pub(crate) fn pop_block(&mut self) -> Option<PhysicalAddress> {
        self.free.pop()
    }

    /// # Safety
    /// See [`FreeList::push`].
    pub(crate) unsafe fn push_block(&mut self, addr: PhysicalAddress) {
        unsafe { self.free.push(addr) }
    }

    pub(crate) fn remove_block(&mut self, addr: PhysicalAddress) -> bool {
        self.free.remove(addr)
    }

    pub(crate) fn toggle_pair(&mut self, pfn: PageFrameNumber) -> bool {
        self.pairs.toggle(pfn)
    }
}

/// A contiguous physical range with its own buddy free areas.
///
/// # Invariants
/// - `start` is page aligned and `size` is a whole number of pages.
/// - Every free block of order `k` lies inside the zone and is aligned to
///   `page_size << k` relative to physical address zero.
pub struct Zone {
    id: ZoneId,
    allocatable: bool,
    start: PhysicalAddress,
    size: u64,
    geometry: PageGeometry,
    areas: [FreeArea; MAX_ORDER as usize],
}

impl Zone {
    /// A zone with empty free areas. The buddy allocator fills them.
    pub(crate) const fn new(
        id: ZoneId,
        allocatable: bool,
        start: PhysicalAddress,
        size: u64,
        geometry: PageGeometry,
        areas: [FreeArea; MAX_ORDER as usize],
    ) -> Self {
        Self {
            id,
            allocatable,
            start,
            size,
            geometry,
            areas,
        }
    }

    /// A zone that is never allocated from, so needs no bitmaps.
    pub(crate) fn reserved(id: ZoneId, start: PhysicalAddress, size: u64, geometry: PageGeometry) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let areas = core::array::from_fn(|order| {
            let order = order as u8;
            FreeArea::new(order, PairBitmap::empty(order))
        });
        Self::new(id, false, start, size, geometry, areas)
    }

    #[must_use]
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    #[must_use]
    pub const fn is_allocatable(&self) -> bool {
        self.allocatable
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// First byte past the zone.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start.as_u64() + self.size)
    }

    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end().as_u64()
    }

    /// # Panics
    /// If `order >= MAX_ORDER`.
    #[must_use]
    pub const fn area(&self, order: u8) -> &FreeArea {
        &self.areas[order as usize]
    }

    pub(crate) const fn area_mut(&mut self, order: u8) -> &mut FreeArea {
        &mut self.areas[order as usize]
    }

    /// Free blocks at `order`.
    #[must_use]
    pub const fn free_blocks(&self, order: u8) -> usize {
        self.area(order).free_blocks()
    }

    /// Bytes currently on this zone's free lists.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.areas
            .iter()
            .map(|area| area.free_blocks() as u64 * self.geometry.block_size(area.order()))
            .sum()
    }
}
