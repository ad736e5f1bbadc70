use crate::buddy::BuddyAllocator;
use crate::error::{AllocError, ZoneError};
use crate::page::Page;
use crate::slab::SlabAllocator;
use crate::zone::Zone;
use kernel_info::boot::MemoryLayout;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress};

/// The physical memory manager: buddy page allocator, slab object allocator,
/// and the metadata they share.
///
/// Built once by [`PhysicalMemory::init`]. All methods take `&mut self`; the
/// [`global`](crate::global) functions serialize access to the boot instance.
pub struct PhysicalMemory {
    pub(crate) layout: MemoryLayout,
    pub(crate) buddy: BuddyAllocator,
    pub(crate) slab: SlabAllocator,
}

impl PhysicalMemory {
    /// One page from the heap zone.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no page is free.
    pub fn get_free_page(&mut self) -> Result<Page, AllocError> {
        self.get_free_pages(0)
    }

    /// `2^order` contiguous pages, aligned to their size.
    ///
    /// # Errors
    /// See [`BuddyAllocator::allocate`].
    pub fn get_free_pages(&mut self, order: u8) -> Result<Page, AllocError> {
        self.buddy.allocate(order)
    }

    /// # Safety
    /// See [`BuddyAllocator::free`].
    pub unsafe fn free_page(&mut self, page: &Page) {
        unsafe { self.free_pages(page, 0) }
    }

    /// # Safety
    /// See [`BuddyAllocator::free`].
    pub unsafe fn free_pages(&mut self, page: &Page, order: u8) {
        unsafe { self.buddy.free(page, order) }
    }

    /// # Errors
    /// [`ZoneError::NotFound`] for an unknown zone id.
    pub fn zone_info(&self, id: u8) -> Result<&Zone, ZoneError> {
        self.buddy.zone_info(id)
    }

    #[must_use]
    pub const fn page_index(&self, addr: PhysicalAddress) -> PageFrameNumber {
        self.buddy.pages().page_index(addr)
    }

    /// # Panics
    /// If `pfn` is outside RAM.
    #[must_use]
    pub fn page_for_index(&self, pfn: PageFrameNumber) -> &Page {
        self.buddy.pages().page_for_index(pfn)
    }

    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Bytes of RAM, metadata and kernel image included.
    #[must_use]
    pub const fn total_memory(&self) -> u64 {
        self.layout.ram_size
    }

    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.layout.page_size
    }

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.layout.total_pages()
    }

    /// Bytes on the buddy free lists. Free slab objects are not counted.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.buddy.free_bytes()
    }

    #[must_use]
    pub const fn buddy(&self) -> &BuddyAllocator {
        &self.buddy
    }

    #[must_use]
    pub const fn slab(&self) -> &SlabAllocator {
        &self.slab
    }
}
