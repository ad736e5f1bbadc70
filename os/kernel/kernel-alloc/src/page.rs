//! Per-page descriptors and the registry that indexes them by frame number.

use crate::slab::SlabCache;
use crate::zone::ZoneId;
use bitfield_struct::bitfield;
use core::ptr::NonNull;
use kernel_memory_addresses::{PageFrameNumber, PageGeometry, PhysicalAddress};

/// Which allocator currently owns a page.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageOwner {
    /// Head page of a block handed out by the buddy allocator.
    Buddy = 0,
    /// Backing page of a slab.
    Slab = 1,
    /// Free, metadata, or a tail page of a larger block.
    Unowned = 2,
}

impl PageOwner {
    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::Buddy,
            1 => Self::Slab,
            _ => Self::Unowned,
        }
    }

    const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// Packed descriptor state.
#[bitfield(u64)]
pub struct PageFlags {
    /// Buddy order of the block this page heads (bits 0..8).
    pub order: u8,
    /// Zone the page belongs to (bits 8..16).
    #[bits(8)]
    pub zone: ZoneId,
    /// Current owner (bits 16..24).
    #[bits(8, default = PageOwner::Unowned)]
    pub owner: PageOwner,
    #[bits(40)]
    __reserved: u64,
}

/// Descriptor of one physical page.
///
/// The allocator hands out copies; the live descriptor stays in the
/// [`PageRegistry`] and is looked up again by address on free.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Page {
    flags: PageFlags,
    cache: Option<NonNull<SlabCache>>,
    start: PhysicalAddress,
}

// Safety: a `Page` is plain data; the cache pointer is only dereferenced by
// the slab allocator under the memory manager's lock.
unsafe impl Send for Page {}

impl Page {
    #[must_use]
    pub const fn new(zone: ZoneId, start: PhysicalAddress) -> Self {
        Self {
            flags: PageFlags::new().with_zone(zone),
            cache: None,
            start,
        }
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> u8 {
        self.flags.order()
    }

    #[inline]
    #[must_use]
    pub const fn zone(&self) -> ZoneId {
        self.flags.zone()
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> PageOwner {
        self.flags.owner()
    }

    /// Owning slab cache, set while `owner()` is [`PageOwner::Slab`].
    #[inline]
    #[must_use]
    pub const fn cache(&self) -> Option<NonNull<SlabCache>> {
        self.cache
    }

    #[inline]
    #[must_use]
    pub const fn start_address(&self) -> PhysicalAddress {
        self.start
    }

    pub(crate) const fn assign_to_buddy(&mut self, order: u8) {
        self.flags = self.flags.with_order(order).with_owner(PageOwner::Buddy);
        self.cache = None;
    }

    pub(crate) const fn assign_to_slab(&mut self, cache: NonNull<SlabCache>) {
        self.flags = self.flags.with_order(0).with_owner(PageOwner::Slab);
        self.cache = Some(cache);
    }

    pub(crate) const fn release(&mut self) {
        self.flags = self.flags.with_order(0).with_owner(PageOwner::Unowned);
        self.cache = None;
    }

    /// Drop the cache back-reference but keep the owner.
    #[cfg(test)]
    pub(crate) const fn detach_cache(&mut self) {
        self.cache = None;
    }
}

/// Dense array of [`Page`] descriptors, one per RAM page.
pub struct PageRegistry {
    pages: NonNull<Page>,
    len: usize,
    first_pfn: PageFrameNumber,
    geometry: PageGeometry,
}

// Safety: the registry is only reachable through the memory manager's lock.
unsafe impl Send for PageRegistry {}

impl PageRegistry {
    /// Number of bytes needed for `pages` descriptors.
    #[must_use]
    pub const fn storage_size(pages: u64) -> u64 {
        pages * size_of::<Page>() as u64
    }

    /// Write a fresh descriptor for each of the `len` pages from `first`,
    /// tagging each with the zone `zone_of` picks for its address.
    ///
    /// # Safety
    /// `storage` must be aligned for `Page`, valid for `len` writes, and
    /// exclusively owned by the registry for its whole lifetime.
    pub(crate) unsafe fn init(
        storage: NonNull<Page>,
        len: usize,
        first: PhysicalAddress,
        geometry: PageGeometry,
        zone_of: impl Fn(PhysicalAddress) -> ZoneId,
    ) -> Self {
        let mut start = first;
        for i in 0..len {
            unsafe {
                storage.as_ptr().add(i).write(Page::new(zone_of(start), start));
            }
            start += geometry.size();
        }
        Self {
            pages: storage,
            len,
            first_pfn: geometry.frame_of(first),
            geometry,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Frame number of the page containing `addr`.
    #[inline]
    #[must_use]
    pub const fn page_index(&self, addr: PhysicalAddress) -> PageFrameNumber {
        self.geometry.frame_of(addr)
    }

    /// Whether `addr` falls on a page this registry describes.
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        let pfn = self.page_index(addr).as_u64();
        pfn >= self.first_pfn.as_u64() && pfn - self.first_pfn.as_u64() < self.len as u64
    }

    /// Descriptor of `pfn`.
    ///
    /// # Panics
    /// If `pfn` is outside RAM.
    #[must_use]
    pub fn page_for_index(&self, pfn: PageFrameNumber) -> &Page {
        &self.as_slice()[self.slot(pfn)]
    }

    /// Descriptor of the page containing `addr`.
    ///
    /// # Panics
    /// If `addr` is outside RAM.
    #[must_use]
    pub fn page_for_address(&self, addr: PhysicalAddress) -> &Page {
        self.page_for_index(self.page_index(addr))
    }

    pub(crate) fn page_for_index_mut(&mut self, pfn: PageFrameNumber) -> &mut Page {
        let slot = self.slot(pfn);
        &mut self.as_mut_slice()[slot]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Page> {
        self.as_slice().iter()
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot(&self, pfn: PageFrameNumber) -> usize {
        pfn.as_u64().wrapping_sub(self.first_pfn.as_u64()) as usize
    }

    const fn as_slice(&self) -> &[Page] {
        // SAFETY: `init` wrote `len` descriptors we own.
        unsafe { core::slice::from_raw_parts(self.pages.as_ptr(), self.len) }
    }

    const fn as_mut_slice(&mut self) -> &mut [Page] {
        unsafe { core::slice::from_raw_parts_mut(self.pages.as_ptr(), self.len) }
    }
}
