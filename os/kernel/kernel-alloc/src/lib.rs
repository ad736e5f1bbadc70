//! # Kernel Physical Memory Management
//!
//! Page and object allocation for the kernel, running identity mapped on a
//! single contiguous RAM window.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 kmalloc / kfree                     │
//! │    • Routes by size: small → slab, large → buddy    │
//! │    • Frees by the owner recorded for the page       │
//! └──────────────┬─────────────────────┬────────────────┘
//!                │                     │
//! ┌──────────────▼──────────────┐      │
//! │        Slab Allocator       │      │
//! │  • One cache per size       │      │
//! │  • bufctl-linked free slots │      │
//! └──────────────┬──────────────┘      │
//!                │ order-0 pages       │
//! ┌──────────────▼─────────────────────▼────────────────┐
//! │                Buddy Allocator                      │
//! │    • Orders 0 ..= MAX_ORDER - 1                     │
//! │    • Per-order free lists and pair bitmaps          │
//! │    • Zones: NoHeap (kernel + metadata), Heap        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every RAM page has a [`Page`] descriptor recording its zone, which
//! allocator owns it and, for slab pages, the owning [`SlabCache`].
//!
//! ## Boot
//!
//! [`boot_mem_init`](global::boot_mem_init) carves the bitmaps, the
//! descriptor array and the bootstrap slab cache out of the RAM directly after
//! the kernel image and hands the rest to the buddy allocator.
//!
//! ```rust,no_run
//! use kernel_alloc::global::{boot_mem_init, kfree, kmalloc};
//! use kernel_info::boot::MemoryLayout;
//!
//! # let kernel_end = 0x4020_0000;
//! unsafe { boot_mem_init(MemoryLayout::qemu_virt(kernel_end)) }.expect("memory manager");
//!
//! let buf = kmalloc(100).expect("100 bytes");
//! unsafe { kfree(buf.as_ptr()) };
//! ```
//!
//! ## Failure Model
//!
//! Exhaustion and bad requests come back as [`AllocError`]. Metadata that
//! contradicts itself (a free at the wrong order, a buddy that the pair bitmap
//! reports free but is not on its list) is logged and halts via panic.

#![cfg_attr(not(any(test, doctest)), no_std)]

#[macro_use]
mod fatal;

mod bitmap;
mod boot;
pub mod buddy;
mod error;
mod free_list;
pub mod global;
mod kmalloc;
mod memory;
pub mod page;
pub mod slab;
#[cfg(test)]
mod testing;
pub mod zone;

pub use boot::MIN_PAGE_SIZE;
pub use buddy::BuddyAllocator;
pub use error::{AllocError, BootMemError, ZoneError};
pub use free_list::FreeBlocks;
pub use global::KernelAllocator;
pub use memory::PhysicalMemory;
pub use page::{Page, PageFlags, PageOwner, PageRegistry};
pub use slab::{SlabAllocator, SlabCache};
pub use zone::{FreeArea, ZONE_COUNT, Zone, ZoneId};
