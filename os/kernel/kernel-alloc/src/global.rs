//! The boot-time memory manager instance.
//!
//! [`boot_mem_init`] publishes a [`PhysicalMemory`] behind a ticket lock. Every
//! function here takes the lock with interrupts masked on the local core, so
//! they are callable from any core and from interrupt handlers.
//!
//! [`KernelAllocator`] adapts the instance to [`GlobalAlloc`]; the kernel
//! binary installs it with `#[global_allocator]`.

use crate::error::{AllocError, BootMemError};
use crate::memory::PhysicalMemory;
use crate::page::Page;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_info::boot::MemoryLayout;
use kernel_sync::{SyncOnceCell, TicketMutex};
use log::warn;

static MEMORY: SyncOnceCell<TicketMutex<PhysicalMemory>> = SyncOnceCell::new();

/// Build the memory manager for `layout` and make it the global instance.
///
/// # Errors
/// [`BootMemError::AlreadyInitialized`] on a second call, otherwise whatever
/// [`PhysicalMemory::init`] reports.
///
/// # Safety
/// As for [`PhysicalMemory::init`]. Must run on a single core before any
/// other function in this module.
pub unsafe fn boot_mem_init(layout: MemoryLayout) -> Result<(), BootMemError> {
    if MEMORY.get().is_some() {
        return Err(BootMemError::AlreadyInitialized);
    }
    let memory = unsafe { PhysicalMemory::init(layout)? };
    MEMORY
        .set(TicketMutex::new(memory))
        .map_err(|_| BootMemError::AlreadyInitialized)
}

/// Whether [`boot_mem_init`] has completed.
pub fn is_initialized() -> bool {
    MEMORY.get().is_some()
}

/// Run `f` on the global instance with its lock held and IRQs masked.
///
/// # Errors
/// [`AllocError::NotInitialized`] before [`boot_mem_init`].
pub fn with_physical_memory<R>(f: impl FnOnce(&mut PhysicalMemory) -> R) -> Result<R, AllocError> {
    let memory = MEMORY.get().ok_or(AllocError::NotInitialized)?;
    let mut guard = memory.lock_irq();
    Ok(f(&mut guard))
}

/// # Errors
/// See [`PhysicalMemory::get_free_page`].
pub fn get_free_page() -> Result<Page, AllocError> {
    get_free_pages(0)
}

/// # Errors
/// See [`PhysicalMemory::get_free_pages`].
pub fn get_free_pages(order: u8) -> Result<Page, AllocError> {
    with_physical_memory(|memory| memory.get_free_pages(order))?
}

/// # Safety
/// See [`PhysicalMemory::free_pages`].
pub unsafe fn free_page(page: &Page) {
    unsafe { free_pages(page, 0) }
}

/// # Safety
/// See [`PhysicalMemory::free_pages`].
pub unsafe fn free_pages(page: &Page, order: u8) {
    if with_physical_memory(|memory| unsafe { memory.free_pages(page, order) }).is_err() {
        warn!("free_pages: memory manager not initialized, leaking {}", page.start_address());
    }
}

/// # Errors
/// See [`PhysicalMemory::kmalloc`].
pub fn kmalloc(size: usize) -> Result<NonNull<u8>, AllocError> {
    with_physical_memory(|memory| memory.kmalloc(size))?
}

/// # Errors
/// See [`PhysicalMemory::kmalloc_aligned`].
pub fn kmalloc_aligned(size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
    with_physical_memory(|memory| memory.kmalloc_aligned(size, align))?
}

/// # Safety
/// See [`PhysicalMemory::kfree`].
pub unsafe fn kfree(ptr: *mut u8) {
    if with_physical_memory(|memory| unsafe { memory.kfree(ptr) }).is_err() && !ptr.is_null() {
        warn!("kfree: memory manager not initialized, leaking {ptr:p}");
    }
}

/// [`GlobalAlloc`] on top of [`kmalloc_aligned`] and [`kfree`].
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        kmalloc_aligned(layout.size(), layout.align()).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from `alloc` on this allocator.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { kfree(ptr) };
    }
}
