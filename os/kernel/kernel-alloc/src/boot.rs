//! Boot-time construction of the memory manager.
//!
//! Allocator metadata is carved from RAM directly after the kernel image:
//!
//! ```text
//! ram_start      kernel_end                                 heap_start        ram_end
//! |  kernel image | pair bitmaps | page descriptors | cache | pad |   heap zone   |
//! |<---------------------- NoHeap zone ---------------------------->|<-- Heap -->|
//! ```

use crate::bitmap::PairBitmap;
use crate::buddy::BuddyAllocator;
use crate::error::BootMemError;
use crate::memory::PhysicalMemory;
use crate::page::{Page, PageRegistry};
use crate::slab::{SlabAllocator, SlabCache};
use crate::zone::{FreeArea, Zone, ZoneId};
use core::ptr::NonNull;
use kernel_info::boot::MemoryLayout;
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PageFrameNumber, PageGeometry, PhysicalAddress};
use log::info;

/// Smallest page size that holds a slab header and a useful number of objects.
pub const MIN_PAGE_SIZE: u64 = 512;

/// Bump cursor over the metadata region.
struct Carve {
    cursor: u64,
    end: u64,
}

impl Carve {
    fn take<T>(&mut self, count: u64) -> Result<NonNull<T>, BootMemError> {
        let start = PhysicalAddress::new(self.cursor).align_up(align_of::<T>() as u64);
        let end = start
            .as_u64()
            .checked_add(count * size_of::<T>() as u64)
            .filter(|&end| end <= self.end)
            .ok_or(BootMemError::MetadataExhaustsRam {
                metadata_end: start.as_u64().saturating_add(count * size_of::<T>() as u64),
                ram_end: self.end,
            })?;
        self.cursor = end;
        // SAFETY: carving starts at the non-zero kernel end and only moves up.
        Ok(unsafe { NonNull::new_unchecked(start.as_mut_ptr()) })
    }
}

impl PhysicalMemory {
    /// Build the memory manager for `layout`.
    ///
    /// Places the pair bitmaps, one descriptor per RAM page, and the bootstrap
    /// slab cache record right after the kernel image, then hands everything
    /// from the next page boundary to the end of RAM to the buddy allocator.
    ///
    /// # Errors
    /// Rejects layouts with an unsupported page size, unaligned RAM, a kernel
    /// end outside RAM, or too little RAM left after the metadata.
    ///
    /// # Safety
    /// `[layout.kernel_end, layout.ram_end())` must be writable memory that
    /// nothing else uses, now or later, and addresses must be usable as
    /// pointers (identity mapping).
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn init(layout: MemoryLayout) -> Result<Self, BootMemError> {
        let geometry = PageGeometry::new(layout.page_size)
            .filter(|geometry| geometry.size() >= MIN_PAGE_SIZE)
            .ok_or(BootMemError::InvalidPageSize(layout.page_size))?;

        let ram_start = PhysicalAddress::new(layout.ram_start);
        if layout.ram_size == 0
            || !geometry.is_aligned(ram_start)
            || layout.ram_size % geometry.size() != 0
            || layout.ram_start.checked_add(layout.ram_size).is_none()
        {
            return Err(BootMemError::UnalignedRam {
                start: layout.ram_start,
                size: layout.ram_size,
            });
        }
        if layout.kernel_end == 0 || !layout.contains(layout.kernel_end) {
            return Err(BootMemError::KernelEndOutOfRange(layout.kernel_end));
        }

        let ram_end = PhysicalAddress::new(layout.ram_end());
        let kernel_end = PhysicalAddress::new(layout.kernel_end);
        let total_pages = layout.total_pages();

        // Pair indices count from a frame aligned to the largest block so
        // that pairs coincide with buddies.
        let base_pfn = geometry.frame_of(kernel_end).as_u64() & !((1 << MAX_ORDER) - 1);
        let base_pfn = PageFrameNumber::new(base_pfn);
        let span = geometry.frame_of(ram_end).as_u64() - base_pfn.as_u64();

        let mut carve = Carve {
            cursor: kernel_end.as_u64(),
            end: ram_end.as_u64(),
        };
        let mut bitmaps = [(NonNull::<u64>::dangling(), 0usize); MAX_ORDER as usize];
        for (order, slot) in bitmaps.iter_mut().enumerate() {
            let words = PairBitmap::words_for(span, order as u8);
            *slot = (carve.take::<u64>(words as u64)?, words);
        }
        let page_storage = carve.take::<Page>(total_pages)?;
        let cache_storage = carve.take::<SlabCache>(1)?;

        let heap_start = geometry.align_up(PhysicalAddress::new(carve.cursor));
        if heap_start >= ram_end {
            return Err(BootMemError::MetadataExhaustsRam {
                metadata_end: carve.cursor,
                ram_end: ram_end.as_u64(),
            });
        }

        let areas = core::array::from_fn(|order| {
            let (words, len) = bitmaps[order];
            let order = order as u8;
            // SAFETY: each bitmap got its own carved range.
            FreeArea::new(order, unsafe { PairBitmap::new(words, len, base_pfn, order) })
        });
        let zones = [
            Zone::reserved(ZoneId::NoHeap, ram_start, heap_start - ram_start, geometry),
            Zone::new(ZoneId::Heap, true, heap_start, ram_end - heap_start, geometry, areas),
        ];

        info!("boot mem: RAM {ram_start}..{ram_end}, kernel image ends at {kernel_end}");
        info!(
            "boot mem: {} KiB of metadata, heap zone {heap_start}..{ram_end}",
            (heap_start - kernel_end) / 1024
        );

        let pages = unsafe {
            PageRegistry::init(page_storage, total_pages as usize, ram_start, geometry, |addr| {
                if addr < heap_start {
                    ZoneId::NoHeap
                } else {
                    ZoneId::Heap
                }
            })
        };
        let mut buddy = unsafe { BuddyAllocator::new(zones, pages) };
        for zone in buddy.zones() {
            info!(
                "boot mem: zone {:?} {}..{}, allocatable: {}",
                zone.id(),
                zone.start(),
                zone.end(),
                zone.is_allocatable()
            );
        }
        let slab = unsafe { SlabAllocator::bootstrap(cache_storage, &mut buddy)? };

        info!(
            "boot mem: {} of {total_pages} pages free",
            buddy.free_bytes() / geometry.size()
        );
        Ok(Self {
            layout,
            buddy,
            slab,
        })
    }
}
