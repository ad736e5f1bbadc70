use core::ptr::NonNull;
use kernel_memory_addresses::PageFrameNumber;

/// One bit per buddy pair at a single order.
///
/// A pair's bit is set exactly when one of its two halves sits on the free
/// list and the other does not. The buddy allocator flips it on every pop,
/// push and merge; reading it on free tells whether the buddy can be
/// coalesced without scanning the list first.
///
/// Pair `i` at order `k` covers pages `base_pfn + i * 2^(k+1)` up to, but not
/// including, `base_pfn + (i + 1) * 2^(k+1)`. `base_pfn` is aligned to the
/// largest block so pairs line up with buddy addresses.
pub(crate) struct PairBitmap {
    words: NonNull<u64>,
    len: usize,
    base_pfn: PageFrameNumber,
    order: u8,
}

// Safety: the bitmap is only reachable through the memory manager's lock.
unsafe impl Send for PairBitmap {}

impl PairBitmap {
    /// A bitmap with no storage, for zones that never hand out blocks.
    pub(crate) const fn empty(order: u8) -> Self {
        Self {
            words: NonNull::dangling(),
            len: 0,
            base_pfn: PageFrameNumber::new(0),
            order,
        }
    }

    /// Number of `u64` words needed to cover `pages` pages at `order`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn words_for(pages: u64, order: u8) -> usize {
        let pairs = pages.div_ceil(1 << (order + 1));
        pairs.div_ceil(u64::BITS as u64) as usize
    }

    /// Wrap `len` words at `words`, clearing them.
    ///
    /// # Safety
    /// `words` must be valid for `len` writes and exclusively owned by the
    /// returned bitmap for its whole lifetime.
    pub(crate) unsafe fn new(
        words: NonNull<u64>,
        len: usize,
        base_pfn: PageFrameNumber,
        order: u8,
    ) -> Self {
        unsafe {
            words.as_ptr().write_bytes(0, len);
        }
        Self {
            words,
            len,
            base_pfn,
            order,
        }
    }

    pub(crate) const fn words(&self) -> &[u64] {
        // SAFETY: `new` hands the storage to us for our lifetime.
        unsafe { core::slice::from_raw_parts(self.words.as_ptr(), self.len) }
    }

    const fn words_mut(&mut self) -> &mut [u64] {
        unsafe { core::slice::from_raw_parts_mut(self.words.as_ptr(), self.len) }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn locate(&self, pfn: PageFrameNumber) -> (usize, u64) {
        let pair = (pfn.as_u64() - self.base_pfn.as_u64()) >> (self.order + 1);
        let word = (pair / u64::BITS as u64) as usize;
        let mask = 1 << (pair % u64::BITS as u64);
        (word, mask)
    }

    /// Current bit of the pair containing `pfn`.
    ///
    /// # Panics
    /// If `pfn` lies outside the range the bitmap was sized for.
    pub(crate) fn test(&self, pfn: PageFrameNumber) -> bool {
        let (word, mask) = self.locate(pfn);
        self.words()[word] & mask != 0
    }

    /// Flip the bit of the pair containing `pfn` and return its previous value.
    ///
    /// # Panics
    /// If `pfn` lies outside the range the bitmap was sized for.
    pub(crate) fn toggle(&mut self, pfn: PageFrameNumber) -> bool {
        let (word, mask) = self.locate(pfn);
        let words = self.words_mut();
        let was_set = words[word] & mask != 0;
        words[word] ^= mask;
        was_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_rounds_up_to_whole_words() {
        assert_eq!(PairBitmap::words_for(128, 0), 1);
        assert_eq!(PairBitmap::words_for(129, 0), 2);
        assert_eq!(PairBitmap::words_for(1, 10), 1);
        assert_eq!(PairBitmap::words_for(0, 0), 0);
    }

    #[test]
    fn buddies_share_a_bit() {
        let mut storage = [u64::MAX; 2];
        let base = PageFrameNumber::new(0x4_0000);
        let mut bits = unsafe {
            PairBitmap::new(NonNull::from(&mut storage).cast(), storage.len(), base, 1)
        };
        assert!(!bits.test(base));

        // pages 0..4 form one order-1 pair
        assert!(!bits.toggle(base.offset(2)));
        assert!(bits.test(base));
        assert!(bits.toggle(base));
        assert!(!bits.test(base.offset(3)));

        // pages 4..8 are the next pair
        bits.toggle(base.offset(4));
        assert_eq!(bits.words(), &[0b10, 0]);
    }
}
