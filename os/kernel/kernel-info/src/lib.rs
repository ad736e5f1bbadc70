//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the board memory layout and the boot-time hand-off record
//! that the physical memory manager consumes. It is the single source of truth
//! for RAM placement, page size and the buddy allocator's maximum order, so the
//! boot code and the allocators cannot drift apart.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the QEMU `virt` AArch64 machine:
//! * **RAM window**: where DRAM starts and how large it is
//! * **Page size**: the 4 KiB translation granule used throughout the kernel
//! * **Buddy orders**: `MAX_ORDER` bounds the largest contiguous allocation
//!
//! ### Boot Information ([`boot`])
//! The [`MemoryLayout`](boot::MemoryLayout) record the boot sequence fills in
//! once the linker-provided end of the kernel image is known.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! RAM_START   ┌─────────────────────────────────┐ 0x4000_0000
//!             │       Kernel Image              │
//!             │   (Text, Data, BSS, Stacks)     │
//! kernel_end  ├─────────────────────────────────┤
//!             │   Allocator metadata            │
//!             │ (pair bitmaps, page descriptors)│
//!             ├─────────────────────────────────┤ (page aligned)
//!             │    Heap zone                    │
//!             │  (managed by buddy + slab)      │
//! RAM_END     └─────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::MemoryLayout;
//! use kernel_info::memory::{PAGE_SIZE, RAM_START};
//!
//! let layout = MemoryLayout::qemu_virt(RAM_START + 0x20_0000);
//! assert_eq!(layout.page_size, PAGE_SIZE);
//! assert!(layout.kernel_end > layout.ram_start);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
