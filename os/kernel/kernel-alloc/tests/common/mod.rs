#![allow(dead_code)]

use kernel_alloc::PhysicalMemory;
use kernel_info::boot::MemoryLayout;
use kernel_info::memory::MAX_ORDER;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

pub const PAGE: u64 = 4096;

/// Page-aligned host memory standing in for physical RAM.
///
/// Aligned to the largest buddy block pair so metadata sizes do not depend on
/// where the host allocator put the buffer.
pub struct HostRam {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the buffer is only handed out as addresses; the allocator under
// test does its own locking.
unsafe impl Send for HostRam {}
unsafe impl Sync for HostRam {}

impl HostRam {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE as usize, (PAGE as usize) << MAX_ORDER).unwrap();
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect("host RAM");
        Self { ptr, layout }
    }

    pub fn start(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn end(&self) -> u64 {
        self.start() + self.layout.size() as u64
    }

    pub fn addr(&self, page: u64) -> u64 {
        self.start() + page * PAGE
    }

    /// Layout with a kernel image covering the first `kernel_pages` pages.
    pub fn layout(&self, kernel_pages: u64) -> MemoryLayout {
        MemoryLayout {
            ram_start: self.start(),
            ram_size: self.layout.size() as u64,
            kernel_end: self.addr(kernel_pages),
            page_size: PAGE,
        }
    }

    pub fn boot(&self, kernel_pages: u64) -> PhysicalMemory {
        unsafe { PhysicalMemory::init(self.layout(kernel_pages)) }.expect("boot")
    }
}

impl Drop for HostRam {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
