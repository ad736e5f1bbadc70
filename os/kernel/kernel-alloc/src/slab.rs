//! Slab allocator for small fixed-size objects.
//!
//! Every slab occupies exactly one order-0 page from the buddy allocator:
//!
//! ```text
//! +------------+----------------------------+----------------------------+
//! | Slab       | bufctl[0..capacity] (u32)  | objects[0..capacity]       |
//! +------------+----------------------------+----------------------------+
//! ^ page start                              ^ smem
//! ```
//!
//! Free objects are threaded through the `bufctl` array: `free` names the
//! first free index and `bufctl[i]` the index after `i`, with [`BUFCTL_END`]
//! terminating the chain.
//!
//! Caches form a circular list whose head is the bootstrap cache. The
//! bootstrap cache holds the records of every other cache, so creating a
//! cache never needs memory the allocator does not already manage.

use crate::buddy::BuddyAllocator;
use crate::error::AllocError;
use crate::page::Page;
use core::ptr::NonNull;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, trace, warn};

type BufCtl = u32;

/// Terminates a slab's free-object chain.
pub const BUFCTL_END: BufCtl = BufCtl::MAX;

/// Bytes at the start of each slab page taken by the slab header.
pub const SLAB_HEADER_SIZE: usize = size_of::<Slab>();

/// Object size of the bootstrap cache: one [`SlabCache`] record plus slack
/// to align it within an arbitrarily placed object.
pub const CACHE_RECORD_SIZE: usize = size_of::<SlabCache>() + align_of::<SlabCache>() - 1;

/// Objects of `object_size` bytes that fit in one slab of `page_size` bytes.
#[must_use]
pub const fn slab_capacity(page_size: usize, object_size: usize) -> usize {
    if page_size <= SLAB_HEADER_SIZE {
        return 0;
    }
    (page_size - SLAB_HEADER_SIZE) / object_size.saturating_add(size_of::<BufCtl>())
}

#[repr(C)]
struct Slab {
    free: BufCtl,
    num_alloc_objects: u32,
    smem: PhysicalAddress,
    next: Option<NonNull<Slab>>,
}

impl Slab {
    const fn bufctl(slab: NonNull<Self>) -> *mut BufCtl {
        // SAFETY: the bufctl array directly follows the header in the same page.
        unsafe { slab.as_ptr().add(1).cast() }
    }
}

fn push_slab(list: &mut Option<NonNull<Slab>>, slab: NonNull<Slab>) {
    // SAFETY: slabs on a cache's lists are live slab headers.
    unsafe { (*slab.as_ptr()).next = *list };
    *list = Some(slab);
}

fn pop_slab(list: &mut Option<NonNull<Slab>>) -> Option<NonNull<Slab>> {
    let slab = (*list)?;
    *list = unsafe { slab.as_ref().next };
    Some(slab)
}

/// All slabs serving one object size.
///
/// A slab moves from `empty` to `partial` on its first allocation and from
/// `partial` to `full` when its last free object is handed out. Frees leave
/// slabs where they are.
#[repr(C)]
pub struct SlabCache {
    next: NonNull<SlabCache>,
    slabs_full: Option<NonNull<Slab>>,
    slabs_partial: Option<NonNull<Slab>>,
    slabs_empty: Option<NonNull<Slab>>,
    object_size: usize,
}

impl SlabCache {
    const fn new(next: NonNull<Self>, object_size: usize) -> Self {
        Self {
            next,
            slabs_full: None,
            slabs_partial: None,
            slabs_empty: None,
            object_size,
        }
    }

    #[must_use]
    pub const fn object_size(&self) -> usize {
        self.object_size
    }

    /// Walk one of this cache's slab lists.
    fn slabs(&self, head: Option<NonNull<Slab>>) -> impl Iterator<Item = &Slab> {
        // SAFETY: slab headers live in pages the cache keeps while it is borrowed.
        core::iter::successors(head.map(|s| unsafe { &*s.as_ptr() }), |slab| {
            slab.next.map(|s| unsafe { &*s.as_ptr() })
        })
    }

    #[must_use]
    pub fn full_slabs(&self) -> usize {
        self.slabs(self.slabs_full).count()
    }

    #[must_use]
    pub fn partial_slabs(&self) -> usize {
        self.slabs(self.slabs_partial).count()
    }

    #[must_use]
    pub fn empty_slabs(&self) -> usize {
        self.slabs(self.slabs_empty).count()
    }

    /// Objects currently handed out across all slabs of this cache.
    #[must_use]
    pub fn allocated_objects(&self) -> usize {
        [self.slabs_full, self.slabs_partial, self.slabs_empty]
            .into_iter()
            .flat_map(|head| self.slabs(head))
            .map(|slab| slab.num_alloc_objects as usize)
            .sum()
    }
}

/// Registry of slab caches.
pub struct SlabAllocator {
    registry: NonNull<SlabCache>,
    page_size: usize,
}

// Safety: the slab allocator is only reachable through the memory manager's lock.
unsafe impl Send for SlabAllocator {}

impl SlabAllocator {
    /// Create the bootstrap cache in `storage` and give it its first slab.
    ///
    /// # Safety
    /// `storage` must be aligned for [`SlabCache`], writable, and owned by the
    /// returned allocator for its whole lifetime.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) unsafe fn bootstrap(
        storage: NonNull<SlabCache>,
        buddy: &mut BuddyAllocator,
    ) -> Result<Self, AllocError> {
        let page_size = buddy.geometry().size() as usize;
        if slab_capacity(page_size, CACHE_RECORD_SIZE) == 0 {
            return Err(AllocError::ObjectTooLarge {
                size: CACHE_RECORD_SIZE,
            });
        }

        unsafe { storage.as_ptr().write(SlabCache::new(storage, CACHE_RECORD_SIZE)) };
        let slab = Self::grow(buddy, storage, CACHE_RECORD_SIZE, page_size)?;
        unsafe { (*storage.as_ptr()).slabs_empty = Some(slab) };

        debug!(
            "slab: bootstrap cache ready, {} records per slab",
            slab_capacity(page_size, CACHE_RECORD_SIZE)
        );
        Ok(Self {
            registry: storage,
            page_size,
        })
    }

    /// Objects of `size` bytes per slab page.
    #[must_use]
    pub const fn capacity_for(&self, size: usize) -> usize {
        slab_capacity(self.page_size, size)
    }

    /// Whether at least one object of `size` bytes fits in a slab.
    #[must_use]
    pub const fn fits(&self, size: usize) -> bool {
        self.capacity_for(size) > 0
    }

    /// Allocate one object of exactly `size` bytes, creating its cache on
    /// first use.
    ///
    /// # Errors
    /// - [`AllocError::ZeroSize`] for `size == 0`.
    /// - [`AllocError::ObjectTooLarge`] if no object of `size` fits in a slab.
    /// - [`AllocError::OutOfMemory`] if a new slab page is needed and the
    ///   buddy allocator has none.
    pub fn alloc(&mut self, buddy: &mut BuddyAllocator, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if !self.fits(size) {
            return Err(AllocError::ObjectTooLarge { size });
        }

        let cache = match self.find_cache(size) {
            Some(cache) => cache,
            None => self.create_cache(buddy, size)?,
        };
        Self::alloc_object(buddy, cache, self.page_size)
    }

    /// Return an object to its slab.
    ///
    /// Pointers below the slab's object area, or past its last object, are
    /// ignored.
    ///
    /// # Safety
    /// `ptr` must point into an object handed out by [`Self::alloc`] that has
    /// not been freed since, and `page` must be the descriptor of its page.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, page: &Page) {
        let Some(cache) = page.cache() else {
            fatal!("slab: page {} has no owning cache", page.start_address());
        };
        let object_size = unsafe { cache.as_ref().object_size };
        let capacity = slab_capacity(self.page_size, object_size);

        let Some(slab_ptr) = NonNull::new(page.start_address().as_mut_ptr::<Slab>()) else {
            fatal!("slab: descriptor without a start address");
        };
        // SAFETY: a slab-owned page starts with a live slab header.
        let slab = unsafe { &mut *slab_ptr.as_ptr() };

        let addr = PhysicalAddress::from_nonnull(ptr);
        if addr < slab.smem {
            warn!("slab: ignoring free of {addr} inside slab metadata");
            return;
        }
        let index = (addr - slab.smem) / object_size as u64;
        if index >= capacity as u64 {
            warn!("slab: ignoring free of {addr} past the last object");
            return;
        }

        let index = index as BufCtl;
        unsafe { Slab::bufctl(slab_ptr).add(index as usize).write(slab.free) };
        slab.free = index;
        slab.num_alloc_objects = slab.num_alloc_objects.saturating_sub(1);
    }

    /// Cache serving exactly `size`-byte objects, if one exists.
    #[must_use]
    pub fn cache_for(&self, size: usize) -> Option<&SlabCache> {
        self.caches().find(|cache| cache.object_size == size)
    }

    /// All caches, bootstrap cache first.
    pub fn caches(&self) -> impl Iterator<Item = &SlabCache> {
        let head = self.registry;
        let mut current = Some(head);
        core::iter::from_fn(move || {
            let cache = current?;
            // SAFETY: registry entries live for the allocator's lifetime.
            let cache = unsafe { &*cache.as_ptr() };
            current = (cache.next != head).then_some(cache.next);
            Some(cache)
        })
    }

    fn find_cache(&self, size: usize) -> Option<NonNull<SlabCache>> {
        let head = self.registry;
        let mut current = head;
        loop {
            let cache = unsafe { current.as_ref() };
            if cache.object_size == size {
                return Some(current);
            }
            current = cache.next;
            if current == head {
                return None;
            }
        }
    }

    /// Carve a record from the bootstrap cache and link it right after the head.
    fn create_cache(&mut self, buddy: &mut BuddyAllocator, size: usize) -> Result<NonNull<SlabCache>, AllocError> {
        let record = Self::alloc_object(buddy, self.registry, self.page_size)?;
        let record = PhysicalAddress::from_nonnull(record).align_up(align_of::<SlabCache>() as u64);
        let Some(cache) = NonNull::new(record.as_mut_ptr::<SlabCache>()) else {
            fatal!("slab: cache record at a null address");
        };

        let head = unsafe { &mut *self.registry.as_ptr() };
        unsafe { cache.as_ptr().write(SlabCache::new(head.next, size)) };
        head.next = cache;
        debug!("slab: new cache for {size}-byte objects");

        let slab = Self::grow(buddy, cache, size, self.page_size)?;
        unsafe { (*cache.as_ptr()).slabs_empty = Some(slab) };
        Ok(cache)
    }

    fn alloc_object(
        buddy: &mut BuddyAllocator,
        cache_ptr: NonNull<SlabCache>,
        page_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: caches live in memory owned by the allocator.
        let cache = unsafe { &mut *cache_ptr.as_ptr() };

        let slab_ptr = match cache.slabs_partial {
            Some(slab) => slab,
            None => {
                let slab = match pop_slab(&mut cache.slabs_empty) {
                    Some(slab) => slab,
                    None => Self::grow(buddy, cache_ptr, cache.object_size, page_size)?,
                };
                push_slab(&mut cache.slabs_partial, slab);
                slab
            }
        };

        let slab = unsafe { &mut *slab_ptr.as_ptr() };
        let index = slab.free;
        slab.free = unsafe { Slab::bufctl(slab_ptr).add(index as usize).read() };
        slab.num_alloc_objects += 1;
        let object = slab.smem + u64::from(index) * cache.object_size as u64;

        if slab.free == BUFCTL_END
            && let Some(full) = pop_slab(&mut cache.slabs_partial)
        {
            push_slab(&mut cache.slabs_full, full);
        }

        let Some(object) = NonNull::new(object.as_mut_ptr::<u8>()) else {
            fatal!("slab: object at a null address");
        };
        Ok(object)
    }

    /// Take an order-0 page from the buddy allocator and lay out a fresh slab in it.
    #[allow(clippy::cast_possible_truncation)]
    fn grow(
        buddy: &mut BuddyAllocator,
        cache: NonNull<SlabCache>,
        object_size: usize,
        page_size: usize,
    ) -> Result<NonNull<Slab>, AllocError> {
        let capacity = slab_capacity(page_size, object_size);
        let page = buddy.allocate(0)?;
        let base = page.start_address();
        buddy.assign_to_slab(base, cache);

        let Some(slab) = NonNull::new(base.as_mut_ptr::<Slab>()) else {
            fatal!("slab: buddy returned a null page");
        };
        let bufctl = Slab::bufctl(slab);
        for i in 0..capacity {
            let next = if i + 1 < capacity { (i + 1) as BufCtl } else { BUFCTL_END };
            unsafe { bufctl.add(i).write(next) };
        }
        let smem = base + (SLAB_HEADER_SIZE + capacity * size_of::<BufCtl>()) as u64;
        unsafe {
            slab.as_ptr().write(Slab {
                free: 0,
                num_alloc_objects: 0,
                smem,
                next: None,
            });
        }

        trace!("slab: new {object_size}-byte slab at {base}, {capacity} objects");
        Ok(slab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageOwner;
    use crate::testing::{HostRam, PAGE, buddy_over};
    use crate::zone::ZoneId;
    use core::mem::MaybeUninit;

    fn slab_over(ram: &HostRam, heap_pages: u64) -> (BuddyAllocator, SlabAllocator) {
        let mut buddy = buddy_over(ram, 0, heap_pages);
        let storage = Box::leak(Box::new(MaybeUninit::<SlabCache>::uninit()));
        let slab = unsafe { SlabAllocator::bootstrap(NonNull::from(storage).cast(), &mut buddy) }.unwrap();
        (buddy, slab)
    }

    fn page_of(buddy: &BuddyAllocator, ptr: NonNull<u8>) -> Page {
        *buddy.pages().page_for_address(PhysicalAddress::from_nonnull(ptr))
    }

    #[test]
    fn bootstrap_takes_one_page() {
        let ram = HostRam::new(8);
        let (buddy, slab) = slab_over(&ram, 8);
        assert_eq!(buddy.free_bytes(), 7 * PAGE);

        let caches: Vec<_> = slab.caches().collect();
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].object_size(), CACHE_RECORD_SIZE);
        assert_eq!(caches[0].empty_slabs(), 1);
    }

    #[test]
    fn slab_pages_point_back_to_their_cache() {
        let ram = HostRam::new(8);
        let (mut buddy, mut slab) = slab_over(&ram, 8);

        let ptr = slab.alloc(&mut buddy, 100).unwrap();
        let page = page_of(&buddy, ptr);
        assert_eq!(page.owner(), PageOwner::Slab);
        let cache = page.cache().unwrap();
        assert_eq!(unsafe { cache.as_ref() }.object_size(), 100);
        assert!(core::ptr::eq(cache.as_ptr(), slab.cache_for(100).unwrap()));
    }

    #[test]
    fn rejects_sizes_without_a_slab() {
        let ram = HostRam::new(8);
        let (mut buddy, mut slab) = slab_over(&ram, 8);
        assert_eq!(slab.alloc(&mut buddy, 0).err(), Some(AllocError::ZeroSize));
        assert_eq!(
            slab.alloc(&mut buddy, 4069).err(),
            Some(AllocError::ObjectTooLarge { size: 4069 })
        );
        assert_eq!(slab.caches().count(), 1);
    }

    #[test]
    fn frees_outside_the_object_area_are_ignored() {
        let ram = HostRam::new(8);
        let (mut buddy, mut slab) = slab_over(&ram, 8);
        assert_eq!(slab.capacity_for(2000), 2);

        let ptr = slab.alloc(&mut buddy, 2000).unwrap();
        let page = page_of(&buddy, ptr);
        let past_end = page.start_address() + (SLAB_HEADER_SIZE + 2 * 4 + 2 * 2000) as u64;
        let header = page.start_address() + 4;
        unsafe {
            slab.free(NonNull::new(past_end.as_mut_ptr()).unwrap(), &page);
            slab.free(NonNull::new(header.as_mut_ptr()).unwrap(), &page);
        }
        assert_eq!(slab.cache_for(2000).unwrap().allocated_objects(), 1);

        unsafe { slab.free(ptr, &page) };
        assert_eq!(slab.cache_for(2000).unwrap().allocated_objects(), 0);
    }

    #[test]
    fn cache_survives_a_failed_first_slab() {
        let ram = HostRam::new(8);
        let (mut buddy, mut slab) = slab_over(&ram, 1);
        assert_eq!(
            slab.alloc(&mut buddy, 100).err(),
            Some(AllocError::OutOfMemory { order: 0 })
        );
        let cache = slab.cache_for(100).unwrap();
        assert_eq!(cache.empty_slabs() + cache.partial_slabs() + cache.full_slabs(), 0);
    }

    #[test]
    #[should_panic(expected = "has no owning cache")]
    fn free_without_cache_is_fatal() {
        let ram = HostRam::new(8);
        let (_buddy, mut slab) = slab_over(&ram, 8);
        let page = Page::new(ZoneId::Heap, ram.addr(3));
        unsafe { slab.free(NonNull::new(ram.addr(3).as_mut_ptr()).unwrap(), &page) };
    }

    #[test]
    fn header_layout() {
        assert_eq!(SLAB_HEADER_SIZE, 24);
        assert_eq!(size_of::<SlabCache>(), 40);
        assert_eq!(CACHE_RECORD_SIZE, 47);
    }

    #[test]
    fn capacity_accounts_for_header_and_bufctl() {
        assert_eq!(slab_capacity(4096, 32), (4096 - 24) / 36);
        assert_eq!(slab_capacity(4096, 4068), 1);
        assert_eq!(slab_capacity(4096, 4069), 0);
        assert_eq!(slab_capacity(4096, 4096), 0);
        assert_eq!(slab_capacity(16, 1), 0);
        assert_eq!(slab_capacity(4096, usize::MAX), 0);
    }
}
