//! Binary buddy allocator over page frames.
//!
//! A block of order `k` spans `2^k` pages and starts at an address aligned to
//! its own size, so its buddy is found by flipping a single address bit:
//!
//! ```text
//! order 2:  [ A . . . | B . . . ]   A ^ (4 pages) == B
//! order 1:  [ a . | b . ]           a ^ (2 pages) == b
//! ```
//!
//! Allocation takes the smallest non-empty order that satisfies the request
//! and halves it, pushing every upper half back onto the next lower order.
//! Freeing walks the other way and merges while the buddy is free, which the
//! per-order pair bitmaps answer without a list scan. Blocks of the largest
//! order never merge.

use crate::error::{AllocError, ZoneError};
use crate::page::{Page, PageOwner, PageRegistry};
use crate::slab::SlabCache;
use crate::zone::{ZONE_COUNT, Zone, ZoneId};
use core::ptr::NonNull;
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PageGeometry, PhysicalAddress};
use log::{debug, error, trace};

pub struct BuddyAllocator {
    zones: [Zone; ZONE_COUNT],
    pages: PageRegistry,
    geometry: PageGeometry,
}

impl BuddyAllocator {
    /// Take ownership of `zones` and seed the free areas of every
    /// allocatable zone.
    ///
    /// # Safety
    /// The memory of every allocatable zone must be writable, unused, and owned
    /// by the allocator from now on.
    pub(crate) unsafe fn new(zones: [Zone; ZONE_COUNT], pages: PageRegistry) -> Self {
        let geometry = pages.geometry();
        let mut buddy = Self {
            zones,
            pages,
            geometry,
        };
        for zone in buddy.zones.iter_mut().filter(|zone| zone.is_allocatable()) {
            unsafe { Self::populate(zone, geometry) };
        }
        buddy
    }

    /// Cover the zone with the largest naturally aligned blocks that fit.
    unsafe fn populate(zone: &mut Zone, geometry: PageGeometry) {
        if !geometry.is_aligned(zone.start()) {
            fatal!("buddy: zone {:?} starts at unaligned {}", zone.id(), zone.start());
        }

        let end = zone.end().as_u64();
        let mut cursor = zone.start();
        let mut blocks = [0usize; MAX_ORDER as usize];
        while cursor.as_u64() + geometry.size() <= end {
            let order = (0..MAX_ORDER)
                .rev()
                .find(|&order| {
                    let size = geometry.block_size(order);
                    cursor.is_aligned_to(size) && cursor.as_u64() + size <= end
                })
                .unwrap_or(0);

            let area = zone.area_mut(order);
            unsafe { area.push_block(cursor) };
            area.toggle_pair(geometry.frame_of(cursor));
            blocks[order as usize] += 1;
            cursor += geometry.block_size(order);
        }

        for (order, count) in blocks.iter().enumerate().filter(|(_, count)| **count > 0) {
            debug!("buddy: zone {:?} order {order}: {count} free blocks", zone.id());
        }
    }

    /// Allocate a block of `2^order` pages.
    ///
    /// Returns a copy of the head page's descriptor, now owned by the buddy
    /// allocator at `order`.
    ///
    /// # Errors
    /// - [`AllocError::OrderTooLarge`] if `order >= MAX_ORDER`.
    /// - [`AllocError::OutOfMemory`] if no zone has a large enough block.
    pub fn allocate(&mut self, order: u8) -> Result<Page, AllocError> {
        if order >= MAX_ORDER {
            return Err(AllocError::OrderTooLarge {
                order,
                max: MAX_ORDER - 1,
            });
        }

        let geometry = self.geometry;
        for zone in self.zones.iter_mut().filter(|zone| zone.is_allocatable()) {
            let Some((block, found)) = (order..MAX_ORDER)
                .find_map(|current| zone.area_mut(current).pop_block().map(|block| (block, current)))
            else {
                continue;
            };
            zone.area_mut(found).toggle_pair(geometry.frame_of(block));

            let mut current = found;
            while current > order {
                current -= 1;
                let upper = geometry.buddy_of(block, current);
                let area = zone.area_mut(current);
                // SAFETY: the upper half belonged to the free block we just popped.
                unsafe { area.push_block(upper) };
                area.toggle_pair(geometry.frame_of(upper));
            }

            let page = self.pages.page_for_index_mut(geometry.frame_of(block));
            page.assign_to_buddy(order);
            trace!("buddy: order {order} block at {block} (split from order {found})");
            return Ok(*page);
        }

        error!("buddy: out of memory for an order {order} block");
        Err(AllocError::OutOfMemory { order })
    }

    /// Return the block headed by `page` and merge it with free buddies.
    ///
    /// # Panics
    /// Halts if the block is not a live buddy allocation of `order`, lies
    /// outside its zone, or if a buddy the pair bitmap reports free is
    /// missing from its free list.
    ///
    /// # Safety
    /// Nothing may access the block after this call.
    pub unsafe fn free(&mut self, page: &Page, order: u8) {
        let start = page.start_address();
        if !self.pages.contains(start) {
            fatal!("buddy: free of {start}, which is outside RAM");
        }

        let geometry = self.geometry;
        let head = geometry.frame_of(start);
        let live = *self.pages.page_for_index(head);
        if live.owner() != PageOwner::Buddy {
            fatal!("buddy: free of {start}, which is {:?}", live.owner());
        }
        if live.order() != order {
            fatal!(
                "buddy: free of {start} at order {order}, but it was allocated at order {}",
                live.order()
            );
        }

        let zone = &mut self.zones[live.zone().index()];
        if !zone.is_allocatable() || !zone.contains(start) {
            fatal!("buddy: free of {start}, which is outside zone {:?}", zone.id());
        }

        let mut block = live.start_address();
        let mut current = order;
        loop {
            let area = zone.area_mut(current);
            let buddy_free = area.toggle_pair(geometry.frame_of(block));
            if !buddy_free || current == MAX_ORDER - 1 {
                // SAFETY: the caller gave the block up and it is on no list.
                unsafe { area.push_block(block) };
                break;
            }

            let buddy = geometry.buddy_of(block, current);
            if !area.remove_block(buddy) {
                fatal!("buddy: {buddy}, buddy of {block}, is missing from the order {current} free list");
            }
            block = block.min(buddy);
            current += 1;
        }

        self.pages.page_for_index_mut(head).release();
        trace!("buddy: freed order {order} at {start}, now order {current} at {block}");
    }

    /// Zone with numeric id `id`.
    ///
    /// # Errors
    /// [`ZoneError::NotFound`] if no zone carries that id.
    pub fn zone_info(&self, id: u8) -> Result<&Zone, ZoneError> {
        ZoneId::try_from(id).map(|id| self.zone(id))
    }

    #[must_use]
    pub const fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.index()]
    }

    #[must_use]
    pub const fn zones(&self) -> &[Zone] {
        &self.zones
    }

    #[must_use]
    pub const fn pages(&self) -> &PageRegistry {
        &self.pages
    }

    #[cfg(test)]
    pub(crate) const fn pages_mut(&mut self) -> &mut PageRegistry {
        &mut self.pages
    }

    #[must_use]
    pub const fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Bytes on the free lists of all zones.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.zones.iter().map(Zone::free_bytes).sum()
    }

    /// Hand the page at `addr` to `cache`.
    pub(crate) fn assign_to_slab(&mut self, addr: PhysicalAddress, cache: NonNull<SlabCache>) {
        let pfn = self.geometry.frame_of(addr);
        self.pages.page_for_index_mut(pfn).assign_to_slab(cache);
    }
}
