use thiserror::Error;

/// Recoverable allocation failures.
///
/// Everything that indicates corrupted allocator state (a buddy missing from
/// its list, an order mismatch on free) is not represented here; those paths
/// log and halt through the kernel's panic handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("zero-sized allocation request")]
    ZeroSize,
    #[error("order {order} exceeds the largest order {max}")]
    OrderTooLarge { order: u8, max: u8 },
    #[error("no free block of order {order} or larger")]
    OutOfMemory { order: u8 },
    #[error("objects of {size} bytes do not fit in a slab")]
    ObjectTooLarge { size: usize },
    #[error("alignment {align} is not a power of two no larger than a page")]
    InvalidAlignment { align: usize },
    #[error("the physical memory manager is not initialized")]
    NotInitialized,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("no zone with id {0}")]
    NotFound(u8),
}

/// Reasons [`PhysicalMemory::init`](crate::PhysicalMemory::init) rejects a
/// memory layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum BootMemError {
    #[error("page size {0} is not a supported power of two")]
    InvalidPageSize(u64),
    #[error("RAM window {start:#x}+{size:#x} is not page aligned")]
    UnalignedRam { start: u64, size: u64 },
    #[error("kernel end {0:#x} lies outside RAM")]
    KernelEndOutOfRange(u64),
    #[error("allocator metadata ends at {metadata_end:#x}, leaving no heap before {ram_end:#x}")]
    MetadataExhaustsRam { metadata_end: u64, ram_end: u64 },
    #[error("bootstrap slab cache could not be created: {0}")]
    Bootstrap(#[from] AllocError),
    #[error("the physical memory manager is already initialized")]
    AlreadyInitialized,
}
