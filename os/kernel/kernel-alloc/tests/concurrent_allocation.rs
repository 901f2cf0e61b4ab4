mod common;

use common::ThreadCpu;
use kernel_alloc::PageAllocator;
use kernel_info::config::{DuplicationPolicy, MemoryConfig};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::FrameArena;
use std::collections::HashSet;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const RAM: u64 = 0x8000_0000;
const CPUS: usize = 4;

fn allocator(ram: &FrameArena, policy: DuplicationPolicy) -> PageAllocator<&FrameArena, ThreadCpu> {
    PageAllocator::new(
        ram,
        ThreadCpu,
        MemoryConfig::new(CPUS, policy),
        ram.start(),
        ram.end(),
    )
}

#[test]
fn draining_from_all_cpus_hands_out_each_page_once() {
    let ram = FrameArena::new(PhysicalAddress::new(RAM), 256);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let start = Barrier::new(CPUS);

    let per_cpu: Vec<Vec<PhysicalPage<Size4K>>> = thread::scope(|s| {
        let handles: Vec<_> = (0..CPUS)
            .map(|cpu| {
                let pages = &pages;
                let start = &start;
                s.spawn(move || {
                    ThreadCpu::become_cpu(cpu);
                    start.wait();
                    let mut mine = Vec::new();
                    while let Ok(page) = pages.allocate() {
                        mine.push(page);
                    }
                    mine
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let all: Vec<_> = per_cpu.iter().flatten().copied().collect();
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 256, "every page allocated exactly once");
    assert_eq!(unique.len(), 256, "no page handed out twice");
    assert_eq!(pages.free_count(), 0);

    thread::scope(|s| {
        for (cpu, mine) in per_cpu.into_iter().enumerate() {
            let pages = &pages;
            s.spawn(move || {
                ThreadCpu::become_cpu(cpu);
                for page in mine {
                    pages.free(page.base());
                }
            });
        }
    });
    assert_eq!(pages.free_count(), 256);
}

#[test]
fn churn_never_double_allocates() {
    const FRAMES: usize = 64;
    let ram = FrameArena::new(PhysicalAddress::new(RAM), FRAMES);
    let pages = allocator(&ram, DuplicationPolicy::Eager);
    let owned: Vec<AtomicBool> = (0..FRAMES).map(|_| AtomicBool::new(false)).collect();
    let start = Barrier::new(CPUS);

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let (pages, owned, start) = (&pages, &owned, &start);
            s.spawn(move || {
                ThreadCpu::become_cpu(cpu);
                start.wait();
                let mut held = Vec::new();
                for round in 0..2_000 {
                    if round % 3 == 2 {
                        if let Some(page) = held.pop() {
                            release(owned, page);
                            pages.free(page.base());
                        }
                    } else if let Ok(page) = pages.allocate() {
                        claim(owned, page);
                        held.push(page);
                    }
                }
                for page in held {
                    release(owned, page);
                    pages.free(page.base());
                }
            });
        }
    });

    assert_eq!(pages.free_count(), FRAMES);
}

#[allow(clippy::cast_possible_truncation)]
fn slot(page: PhysicalPage<Size4K>) -> usize {
    ((page.base().as_u64() - RAM) >> 12) as usize
}

fn claim(owned: &[AtomicBool], page: PhysicalPage<Size4K>) {
    let was = owned[slot(page)].swap(true, Ordering::SeqCst);
    assert!(!was, "page {page} allocated while still owned");
}

fn release(owned: &[AtomicBool], page: PhysicalPage<Size4K>) {
    owned[slot(page)].store(false, Ordering::SeqCst);
}

#[test]
fn concurrent_sharing_reclaims_once() {
    let ram = FrameArena::new(PhysicalAddress::new(RAM), 8);
    let pages = allocator(&ram, DuplicationPolicy::CopyOnWrite);
    let page = pages.allocate().unwrap();
    for _ in 0..(CPUS * 100 - 1) {
        pages.share(page);
    }

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let pages = &pages;
            s.spawn(move || {
                ThreadCpu::become_cpu(cpu);
                for _ in 0..100 {
                    pages.free(page.base());
                }
            });
        }
    });

    assert_eq!(pages.ref_count(page), Some(0));
    assert_eq!(pages.free_count(), 8);
}
