use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr::NonNull;
use kernel_memory_addresses::PhysicalAddress;

/// Link stored in the first bytes of every **free** buddy block.
///
/// ```text
/// +----------------------+---------------------------------+
/// | FreeBlock (next)     |   rest of the block (unused)    |
/// +----------------------+---------------------------------+
/// ^ block address
/// ```
///
/// The bytes are only a `FreeBlock` while the block sits on a [`FreeList`];
/// once popped they belong to whoever allocated the block. Nothing outside
/// this module ever sees a `FreeBlock`.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// LIFO singly linked list of free blocks of one order.
///
/// # Invariants
/// - Every node is the first byte of a free, writable block that appears on
///   no other list.
/// - `len` equals the number of reachable nodes.
pub(crate) struct FreeList {
    head: Option<NonNull<FreeBlock>>,
    len: usize,
}

// Safety: the list is only reachable through the memory manager's lock.
unsafe impl Send for FreeList {}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Make the block at `addr` the new head.
    ///
    /// # Safety
    /// - `[addr, addr + block size)` must be writable, free, and on no list.
    /// - `addr` must be aligned for a pointer.
    pub(crate) unsafe fn push(&mut self, addr: PhysicalAddress) {
        let node = addr.as_mut_ptr::<FreeBlock>();
        unsafe {
            node.write(FreeBlock { next: self.head });
        }
        self.head = NonNull::new(node);
        self.len += 1;
    }

    /// Detach the most recently pushed block.
    pub(crate) fn pop(&mut self) -> Option<PhysicalAddress> {
        let node = self.head?;
        // SAFETY: list invariant; the head is a live FreeBlock.
        self.head = unsafe { node.as_ref().next };
        self.len -= 1;
        Some(PhysicalAddress::from_nonnull(node))
    }

    /// Unlink the block at `addr` wherever it sits. Linear in the list length.
    ///
    /// Returns `false` if `addr` is not on the list.
    pub(crate) fn remove(&mut self, addr: PhysicalAddress) -> bool {
        let mut link: *mut Option<NonNull<FreeBlock>> = &raw mut self.head;
        // SAFETY: `link` always points either at `self.head` or at the `next`
        // field of a live node.
        unsafe {
            while let Some(node) = *link {
                if PhysicalAddress::from_nonnull(node) == addr {
                    *link = node.as_ref().next;
                    self.len -= 1;
                    return true;
                }
                link = &raw mut (*node.as_ptr()).next;
            }
        }
        false
    }

    pub(crate) fn iter(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            next: self.head,
            _list: PhantomData,
        }
    }
}

/// Addresses on a free list, head first.
pub struct FreeBlocks<'a> {
    next: Option<NonNull<FreeBlock>>,
    _list: PhantomData<&'a FreeList>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = PhysicalAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        // SAFETY: the borrowed list keeps its nodes alive and unchanged.
        self.next = unsafe { node.as_ref().next };
        Some(PhysicalAddress::from_nonnull(node))
    }
}

impl FusedIterator for FreeBlocks<'_> {}
