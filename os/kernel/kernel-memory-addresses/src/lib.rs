//! # Physical Address Types
//!
//! Strongly typed wrappers for the raw values the physical memory manager
//! juggles: byte addresses, page-frame numbers and the page geometry that
//! converts between them.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical byte address. |
//! | [`PageFrameNumber`] | Index of a physical page frame, `address >> page_shift`. |
//! | [`PageGeometry`] | Page size fixed at boot; converts addresses, frames and buddy orders. |
//!
//! The kernel runs identity mapped, so a [`PhysicalAddress`] can be turned
//! back into a pointer with [`PhysicalAddress::as_mut_ptr`].
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let geometry = PageGeometry::new(4096).unwrap();
//! let pa = PhysicalAddress::new(0x4000_3000);
//!
//! let pfn = geometry.frame_of(pa);
//! assert_eq!(pfn.as_u64(), 0x4_0003);
//! assert_eq!(geometry.base_of(pfn), pa);
//!
//! // An order-2 block spans four pages
//! assert_eq!(geometry.block_size(2), 4 * 4096);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_frame;
mod page_geometry;
mod physical_address;

pub use page_frame::PageFrameNumber;
pub use page_geometry::PageGeometry;
pub use physical_address::PhysicalAddress;
