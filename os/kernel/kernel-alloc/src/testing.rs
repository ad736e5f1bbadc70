//! Host-memory stand-ins for physical RAM.

use crate::buddy::BuddyAllocator;
use crate::bitmap::PairBitmap;
use crate::page::{Page, PageRegistry};
use crate::zone::{FreeArea, Zone, ZoneId};
use core::ptr::NonNull;
use kernel_info::boot::MemoryLayout;
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PageFrameNumber, PageGeometry, PhysicalAddress};
use std::alloc::{Layout, alloc_zeroed, dealloc};

pub const PAGE: u64 = 4096;

/// Aligned to `2^MAX_ORDER` pages so pair bitmaps can start at the first page.
const RAM_ALIGN: usize = (PAGE as usize) << MAX_ORDER;

pub struct HostRam {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HostRam {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE as usize, RAM_ALIGN).unwrap();
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect("host RAM");
        Self { ptr, layout }
    }

    pub fn pages(&self) -> u64 {
        self.layout.size() as u64 / PAGE
    }

    pub fn addr(&self, page: u64) -> PhysicalAddress {
        PhysicalAddress::from_nonnull(self.ptr) + page * PAGE
    }

    pub fn pfn(&self, page: u64) -> PageFrameNumber {
        PageFrameNumber::new(self.addr(page).as_u64() / PAGE)
    }

    /// Board layout with a kernel image covering the first `kernel_pages` pages.
    pub fn layout(&self, kernel_pages: u64) -> MemoryLayout {
        MemoryLayout {
            ram_start: self.addr(0).as_u64(),
            ram_size: self.layout.size() as u64,
            kernel_end: self.addr(kernel_pages).as_u64(),
            page_size: PAGE,
        }
    }
}

impl Drop for HostRam {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Buddy allocator whose heap zone covers `heap_pages` pages starting
/// `heap_offset` pages into `ram`. Metadata lives on the host heap.
pub fn buddy_over(ram: &HostRam, heap_offset: u64, heap_pages: u64) -> BuddyAllocator {
    buddy_over_range(ram, ram.addr(heap_offset), heap_pages * PAGE)
}

/// Like [`buddy_over`], with the heap zone given as a raw byte range.
pub fn buddy_over_range(ram: &HostRam, heap_start: PhysicalAddress, heap_size: u64) -> BuddyAllocator {
    let geometry = PageGeometry::new(PAGE).unwrap();
    let total = ram.pages();

    let areas = core::array::from_fn(|order| {
        let order = order as u8;
        let words = PairBitmap::words_for(total, order);
        let storage = Box::leak(vec![0u64; words].into_boxed_slice());
        let bits = unsafe { PairBitmap::new(NonNull::from(storage).cast(), words, ram.pfn(0), order) };
        FreeArea::new(order, bits)
    });
    let zones = [
        Zone::reserved(ZoneId::NoHeap, ram.addr(0), heap_start - ram.addr(0), geometry),
        Zone::new(ZoneId::Heap, true, heap_start, heap_size, geometry, areas),
    ];

    let storage = Box::leak(vec![Page::new(ZoneId::NoHeap, PhysicalAddress::zero()); total as usize].into_boxed_slice());
    let pages = unsafe {
        PageRegistry::init(NonNull::from(storage).cast(), total as usize, ram.addr(0), geometry, |addr| {
            if addr < heap_start { ZoneId::NoHeap } else { ZoneId::Heap }
        })
    };
    unsafe { BuddyAllocator::new(zones, pages) }
}
