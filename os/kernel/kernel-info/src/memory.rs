//! # Memory Layout

/// Physical address at which DRAM starts on the QEMU `virt` machine.
pub const RAM_START: u64 = 0x4000_0000;

/// Amount of DRAM the board is configured with (4 GiB).
pub const RAM_SIZE: u64 = 0x1_0000_0000;

/// One past the last DRAM byte.
pub const RAM_END: u64 = RAM_START + RAM_SIZE;

/// Size of a page frame (4 KiB translation granule).
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

/// Number of buddy orders. Blocks span `2^0 ..= 2^(MAX_ORDER - 1)` pages,
/// so the largest single allocation is `PAGE_SIZE << (MAX_ORDER - 1)` bytes.
pub const MAX_ORDER: u8 = 11;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(RAM_START.is_multiple_of(PAGE_SIZE));
    assert!(RAM_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(MAX_ORDER > 0 && (MAX_ORDER as u32) < u64::BITS - PAGE_SHIFT);
};
