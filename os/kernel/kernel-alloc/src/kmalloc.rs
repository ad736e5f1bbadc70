//! Size-based routing between the slab and buddy allocators.

use crate::error::AllocError;
use crate::memory::PhysicalMemory;
use crate::page::PageOwner;
use core::ptr::NonNull;
use kernel_memory_addresses::PhysicalAddress;
use log::{trace, warn};

impl PhysicalMemory {
    /// Allocate `size` bytes.
    ///
    /// Requests of at least a page, and sizes no slab can hold, get whole
    /// pages from the buddy allocator (rounded up to a power of two). Smaller
    /// requests get an object of exactly `size` bytes from the slab allocator.
    ///
    /// # Errors
    /// - [`AllocError::ZeroSize`] for `size == 0`.
    /// - [`AllocError::OrderTooLarge`] if `size` exceeds the largest block.
    /// - [`AllocError::OutOfMemory`] if the backing pages are exhausted.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if self.needs_pages(size) {
            return self.alloc_pages_for(size);
        }
        self.slab.alloc(&mut self.buddy, size)
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Small requests over-allocate `align - 1` bytes from a slab and return
    /// the first aligned address inside the object; page allocations are
    /// already aligned.
    ///
    /// # Errors
    /// [`AllocError::InvalidAlignment`] unless `align` is a power of two no
    /// larger than a page, otherwise as [`Self::kmalloc`].
    pub fn kmalloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if !align.is_power_of_two() || align as u64 > self.page_size() {
            return Err(AllocError::InvalidAlignment { align });
        }
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let padded = size.saturating_add(align - 1);
        if self.needs_pages(padded) {
            return self.alloc_pages_for(size);
        }
        let object = self.slab.alloc(&mut self.buddy, padded)?;
        let addr = PhysicalAddress::from_nonnull(object);
        #[allow(clippy::cast_possible_truncation)]
        let offset = (addr.align_up(align as u64) - addr) as usize;
        // SAFETY: `offset < align`, so the result stays inside the padded object.
        Ok(unsafe { object.add(offset) })
    }

    /// Release memory from [`Self::kmalloc`] or [`Self::kmalloc_aligned`].
    ///
    /// The owner recorded for the containing page decides which allocator
    /// takes it back. Null pointers and pointers outside RAM are ignored, as
    /// are pointers into pages nobody owns.
    ///
    /// # Panics
    /// Halts on corrupted ownership metadata: a slab page without a cache.
    ///
    /// # Safety
    /// `ptr` must be null or come from this manager's `kmalloc` family and not
    /// have been freed since. Nothing may access the memory afterwards.
    pub unsafe fn kfree(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let addr = PhysicalAddress::from_nonnull(ptr);
        if !self.buddy.pages().contains(addr) {
            warn!("kfree: {addr} is outside RAM, ignoring");
            return;
        }

        let page = *self.buddy.pages().page_for_address(addr);
        match page.owner() {
            PageOwner::Buddy => unsafe { self.buddy.free(&page, page.order()) },
            PageOwner::Slab => {
                if page.cache().is_none() {
                    fatal!("kfree: slab page {} has no owning cache", page.start_address());
                }
                unsafe { self.slab.free(ptr, &page) };
            }
            PageOwner::Unowned => warn!("kfree: {addr} is in an unowned page, ignoring"),
        }
    }

    fn needs_pages(&self, size: usize) -> bool {
        size as u64 >= self.page_size() || !self.slab.fits(size)
    }

    fn alloc_pages_for(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let order = self.buddy.geometry().order_for_size(size as u64);
        let page = self.buddy.allocate(order)?;
        trace!("kmalloc: {size} bytes as order {order} at {}", page.start_address());
        let Some(block) = NonNull::new(page.start_address().as_mut_ptr()) else {
            fatal!("kmalloc: buddy returned a null block");
        };
        Ok(block)
    }
}
