mod common;

use common::{HostRam, PAGE};
use kernel_alloc::slab::{CACHE_RECORD_SIZE, slab_capacity};
use kernel_alloc::{AllocError, BootMemError, PageOwner, PhysicalMemory, ZoneError, ZoneId};
use kernel_info::boot::MemoryLayout;
use kernel_memory_addresses::PhysicalAddress;
use std::ptr::NonNull;

fn owner_of(memory: &PhysicalMemory, ptr: NonNull<u8>) -> PageOwner {
    let pfn = memory.page_index(PhysicalAddress::from_nonnull(ptr));
    memory.page_for_index(pfn).owner()
}

fn order_of(memory: &PhysicalMemory, ptr: NonNull<u8>) -> u8 {
    let pfn = memory.page_index(PhysicalAddress::from_nonnull(ptr));
    memory.page_for_index(pfn).order()
}

#[test]
fn boot_splits_ram_into_metadata_and_heap() {
    let ram = HostRam::new(1024);
    let memory = ram.boot(16);

    let no_heap = memory.zone_info(0).unwrap();
    let heap = memory.zone_info(1).unwrap();
    assert_eq!(no_heap.start().as_u64(), ram.start());
    assert_eq!(no_heap.end(), heap.start());
    assert_eq!(heap.end().as_u64(), ram.end());
    assert!(heap.start().as_u64() > ram.addr(16));
    assert!(heap.start().is_aligned_to(PAGE));
    assert!(!no_heap.is_allocatable() && heap.is_allocatable());
    assert_eq!(memory.zone_info(2).err(), Some(ZoneError::NotFound(2)));

    assert_eq!(memory.total_memory(), 1024 * PAGE);
    assert_eq!(memory.total_pages(), 1024);
    assert_eq!(memory.page_size(), PAGE);

    // one page went to the bootstrap slab
    assert_eq!(memory.free_bytes(), heap.size() - PAGE);
    let slab_pages = memory.buddy().pages().iter().filter(|p| p.owner() == PageOwner::Slab).count();
    assert_eq!(slab_pages, 1);
}

#[test]
fn every_page_has_a_descriptor() {
    let ram = HostRam::new(256);
    let memory = ram.boot(4);
    let heap_start = memory.zone_info(1).unwrap().start();

    assert_eq!(memory.buddy().pages().len(), 256);
    for (i, page) in memory.buddy().pages().iter().enumerate() {
        let start = PhysicalAddress::new(ram.addr(i as u64));
        assert_eq!(page.start_address(), start);
        let zone = if start < heap_start { ZoneId::NoHeap } else { ZoneId::Heap };
        assert_eq!(page.zone(), zone);
    }
}

#[test]
fn boot_rejects_bad_layouts() {
    let ram = HostRam::new(8);
    let good = ram.layout(1);

    let odd_page = MemoryLayout { page_size: 3000, ..good };
    assert_eq!(unsafe { PhysicalMemory::init(odd_page) }.err(), Some(BootMemError::InvalidPageSize(3000)));

    let tiny_page = MemoryLayout { page_size: 64, ..good };
    assert_eq!(unsafe { PhysicalMemory::init(tiny_page) }.err(), Some(BootMemError::InvalidPageSize(64)));

    let unaligned = MemoryLayout { ram_start: good.ram_start + 8, ..good };
    assert!(matches!(
        unsafe { PhysicalMemory::init(unaligned) },
        Err(BootMemError::UnalignedRam { .. })
    ));

    let kernel_past_ram = MemoryLayout { kernel_end: ram.end(), ..good };
    assert_eq!(
        unsafe { PhysicalMemory::init(kernel_past_ram) }.err(),
        Some(BootMemError::KernelEndOutOfRange(ram.end()))
    );

    let crowded = MemoryLayout { kernel_end: ram.addr(7) + 100, ..good };
    assert!(matches!(
        unsafe { PhysicalMemory::init(crowded) },
        Err(BootMemError::MetadataExhaustsRam { .. })
    ));
}

#[test]
fn kmalloc_routes_by_size() {
    let ram = HostRam::new(1024);
    let mut memory = ram.boot(16);

    let small = memory.kmalloc(100).unwrap();
    assert_eq!(owner_of(&memory, small), PageOwner::Slab);
    assert!(memory.slab().cache_for(100).is_some());

    let one_page = memory.kmalloc(4096).unwrap();
    assert_eq!((owner_of(&memory, one_page), order_of(&memory, one_page)), (PageOwner::Buddy, 0));
    assert!(PhysicalAddress::from_nonnull(one_page).is_aligned_to(PAGE));

    let two_pages = memory.kmalloc(5000).unwrap();
    assert_eq!(order_of(&memory, two_pages), 1);

    let four_pages = memory.kmalloc(3 * 4096).unwrap();
    assert_eq!(order_of(&memory, four_pages), 2);

    // the largest object that still fits a slab
    let largest = memory.kmalloc(4068).unwrap();
    assert_eq!(owner_of(&memory, largest), PageOwner::Slab);

    // one byte more has no slab, so it takes a page
    let no_slab = memory.kmalloc(4069).unwrap();
    assert_eq!(owner_of(&memory, no_slab), PageOwner::Buddy);
    assert!(memory.slab().cache_for(4069).is_none());

    assert_eq!(memory.kmalloc(0).err(), Some(AllocError::ZeroSize));
    assert!(matches!(memory.kmalloc(1 << 40), Err(AllocError::OrderTooLarge { .. })));
}

#[test]
fn slab_fills_to_capacity_before_growing() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    let capacity = slab_capacity(PAGE as usize, 32);
    assert_eq!(capacity, (4096 - 24) / 36);
    assert_eq!(memory.slab().capacity_for(32), capacity);

    let objects: Vec<u64> = (0..capacity)
        .map(|_| PhysicalAddress::from_nonnull(memory.kmalloc(32).unwrap()).as_u64())
        .collect();
    let page = objects[0] & !(PAGE - 1);
    assert!(objects.iter().all(|addr| addr & !(PAGE - 1) == page));
    assert!(objects.windows(2).all(|pair| pair[1] == pair[0] + 32));

    let cache = memory.slab().cache_for(32).unwrap();
    assert_eq!((cache.full_slabs(), cache.partial_slabs(), cache.empty_slabs()), (1, 0, 0));
    assert_eq!(cache.allocated_objects(), capacity);

    let next = PhysicalAddress::from_nonnull(memory.kmalloc(32).unwrap()).as_u64();
    assert_ne!(next & !(PAGE - 1), page);
    let cache = memory.slab().cache_for(32).unwrap();
    assert_eq!((cache.full_slabs(), cache.partial_slabs()), (1, 1));
}

#[test]
fn frees_leave_full_slabs_on_the_full_list() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    assert_eq!(slab_capacity(PAGE as usize, 2000), 2);

    let a = memory.kmalloc(2000).unwrap();
    let b = memory.kmalloc(2000).unwrap();
    let first_slab = PhysicalAddress::from_nonnull(a).align_down(PAGE);
    assert_eq!(PhysicalAddress::from_nonnull(b).align_down(PAGE), first_slab);

    unsafe {
        memory.kfree(a.as_ptr());
        memory.kfree(b.as_ptr());
    }
    let cache = memory.slab().cache_for(2000).unwrap();
    assert_eq!(
        (cache.full_slabs(), cache.partial_slabs(), cache.empty_slabs(), cache.allocated_objects()),
        (1, 0, 0, 0)
    );

    // the emptied slab is never searched, so the next object needs a new page
    let c = memory.kmalloc(2000).unwrap();
    assert_ne!(PhysicalAddress::from_nonnull(c).align_down(PAGE), first_slab);
    let cache = memory.slab().cache_for(2000).unwrap();
    assert_eq!((cache.full_slabs(), cache.partial_slabs()), (1, 1));
    assert_eq!(owner_of(&memory, a), PageOwner::Slab);
}

#[test]
fn freed_objects_are_reused_first() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);

    let a = memory.kmalloc(64).unwrap();
    let b = memory.kmalloc(64).unwrap();
    assert_ne!(a, b);
    unsafe { memory.kfree(a.as_ptr()) };
    assert_eq!(memory.slab().cache_for(64).unwrap().allocated_objects(), 1);
    assert_eq!(memory.kmalloc(64).unwrap(), a);
}

#[test]
fn kfree_ignores_foreign_pointers() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    let object = memory.kmalloc(48).unwrap();
    let free_before = memory.free_bytes();

    let mut outside = 0u64;
    let slab_header = PhysicalAddress::from_nonnull(object).align_down(PAGE);
    let free_page = memory.zone_info(1).unwrap().end().as_u64() - PAGE;
    unsafe {
        memory.kfree(std::ptr::null_mut());
        memory.kfree((&raw mut outside).cast());
        memory.kfree(slab_header.as_mut_ptr());
        memory.kfree(free_page as *mut u8);
    }

    assert_eq!(memory.free_bytes(), free_before);
    assert_eq!(memory.slab().cache_for(48).unwrap().allocated_objects(), 1);
}

#[test]
fn page_ownership_is_released_on_free() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    let free_before = memory.free_bytes();

    let block = memory.kmalloc(8192).unwrap();
    assert_eq!(owner_of(&memory, block), PageOwner::Buddy);
    assert_eq!(memory.free_bytes(), free_before - 2 * PAGE);

    unsafe { memory.kfree(block.as_ptr()) };
    assert_eq!(owner_of(&memory, block), PageOwner::Unowned);
    assert_eq!(memory.free_bytes(), free_before);
}

#[test]
fn pages_round_trip_through_the_page_api() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    let free_before = memory.free_bytes();

    let single = memory.get_free_page().unwrap();
    let quad = memory.get_free_pages(2).unwrap();
    assert_eq!(quad.order(), 2);
    assert!(quad.start_address().is_aligned_to(4 * PAGE));
    assert_eq!(memory.free_bytes(), free_before - 5 * PAGE);

    unsafe {
        memory.free_pages(&quad, 2);
        memory.free_page(&single);
    }
    assert_eq!(memory.free_bytes(), free_before);
}

#[test]
fn aligned_allocations() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);

    for align in [1, 8, 64, 512] {
        let ptr = memory.kmalloc_aligned(24, align).unwrap();
        assert!(PhysicalAddress::from_nonnull(ptr).is_aligned_to(align as u64), "align {align}");
        assert_eq!(owner_of(&memory, ptr), PageOwner::Slab);
    }

    let padded = memory.slab().cache_for(24 + 63).unwrap();
    assert_eq!(padded.allocated_objects(), 1);
    let ptr = memory.kmalloc_aligned(24, 64).unwrap();
    unsafe { memory.kfree(ptr.as_ptr()) };
    assert_eq!(memory.slab().cache_for(24 + 63).unwrap().allocated_objects(), 1);

    let big = memory.kmalloc_aligned(5000, 4096).unwrap();
    assert_eq!(order_of(&memory, big), 1);

    assert_eq!(memory.kmalloc_aligned(16, 3).err(), Some(AllocError::InvalidAlignment { align: 3 }));
    assert_eq!(
        memory.kmalloc_aligned(16, 8192).err(),
        Some(AllocError::InvalidAlignment { align: 8192 })
    );
    assert_eq!(memory.kmalloc_aligned(0, 8).err(), Some(AllocError::ZeroSize));
}

#[test]
fn caches_are_linked_after_the_bootstrap_cache() {
    let ram = HostRam::new(256);
    let mut memory = ram.boot(4);
    memory.kmalloc(100).unwrap();
    memory.kmalloc(200).unwrap();
    memory.kmalloc(100).unwrap();

    let sizes: Vec<usize> = memory.slab().caches().map(|cache| cache.object_size()).collect();
    assert_eq!(sizes, [CACHE_RECORD_SIZE, 200, 100]);
    assert_eq!(memory.slab().cache_for(100).unwrap().allocated_objects(), 2);
    // two cache records live in the bootstrap cache
    assert_eq!(memory.slab().cache_for(CACHE_RECORD_SIZE).unwrap().allocated_objects(), 2);
}

#[test]
fn slab_growth_stops_when_pages_run_out() {
    let ram = HostRam::new(32);
    let mut memory = ram.boot(2);
    let heap_pages = memory.free_bytes() / PAGE;
    let per_slab = slab_capacity(PAGE as usize, 2000);
    assert_eq!(per_slab, 2);

    let mut count = 0;
    let err = loop {
        match memory.kmalloc(2000) {
            Ok(_) => count += 1,
            Err(err) => break err,
        }
    };
    assert_eq!(err, AllocError::OutOfMemory { order: 0 });
    assert_eq!(count as u64, heap_pages * per_slab as u64);
    assert_eq!(memory.free_bytes(), 0);
}

#[test]
#[should_panic(expected = "allocated at order 2")]
fn freeing_pages_at_the_wrong_order_halts() {
    let ram = HostRam::new(64);
    let mut memory = ram.boot(2);
    let page = memory.get_free_pages(2).unwrap();
    unsafe { memory.free_pages(&page, 1) };
}
