//! # Kernel Boot Information

use crate::memory::{PAGE_SIZE, RAM_SIZE, RAM_START};

/// RAM layout discovered by the boot sequence and handed to the memory manager.
///
/// All values are physical addresses or byte counts. On the target the kernel
/// runs identity mapped, so these double as pointers.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    /// First byte of DRAM. Must be page aligned.
    pub ram_start: u64,
    /// Number of DRAM bytes. Must be a multiple of `page_size`.
    pub ram_size: u64,
    /// One past the last byte of the kernel image (text, data, bss, stacks).
    /// Everything from here to the end of RAM is handed to the allocators.
    pub kernel_end: u64,
    /// Page frame size in bytes, a power of two.
    pub page_size: u64,
}

impl MemoryLayout {
    /// Board default for the QEMU `virt` machine, given the linker-provided end
    /// of the kernel image.
    #[must_use]
    pub const fn qemu_virt(kernel_end: u64) -> Self {
        Self {
            ram_start: RAM_START,
            ram_size: RAM_SIZE,
            kernel_end,
            page_size: PAGE_SIZE,
        }
    }

    /// One past the last byte of RAM.
    #[inline]
    #[must_use]
    pub const fn ram_end(&self) -> u64 {
        self.ram_start + self.ram_size
    }

    /// Number of page frames in RAM.
    #[inline]
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.ram_size / self.page_size
    }

    /// Whether `addr` lies inside `[ram_start, ram_end)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.ram_start && addr < self.ram_end()
    }
}
