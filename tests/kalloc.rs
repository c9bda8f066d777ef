use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use xv6_mm::consts::{JUNK_ALLOC, PGSIZE, PHYSTOP};
use xv6_mm::mm::{Addr, CowKmem, KallocKind, Kmem, KmemConfig, PageAllocator, PerCpuKmem, PhysMemory};
use xv6_mm::process::CpuManager;
use xv6_mm::Error;

const BASE: usize = 0x8020_0000;

fn config(kind: KallocKind, npages: usize, ncpu: usize) -> KmemConfig {
    KmemConfig {
        start: BASE,
        end: BASE + npages * PGSIZE,
        ncpu,
        kind,
    }
}

#[test]
fn kinit_rounds_unaligned_range() {
    let kmem = Kmem::kinit(&KmemConfig {
        start: BASE + 1,
        end: BASE + 4 * PGSIZE + 17,
        ncpu: 2,
        kind: KallocKind::PerCpu,
    })
    .unwrap();
    assert_eq!(kmem.total_pages(), 3);
    assert_eq!(kmem.memory().start().as_usize(), BASE + PGSIZE);
}

#[test]
fn kinit_rejects_bad_config() {
    let mut bad = config(KallocKind::PerCpu, 4, 0);
    assert!(matches!(Kmem::kinit(&bad), Err(Error::InvalidConfig(_))));
    bad.ncpu = 1;
    bad.end = BASE + 100;
    assert!(matches!(Kmem::kinit(&bad), Err(Error::InvalidRange { .. })));

    // 超出物理内存顶端
    bad.end = PHYSTOP + PGSIZE;
    assert!(matches!(Kmem::kinit(&bad), Err(Error::InvalidRange { .. })));
}

#[test]
fn both_allocators_hand_out_every_page_once() {
    for kind in [KallocKind::PerCpu, KallocKind::Cow] {
        let kmem = Kmem::kinit(&config(kind, 16, 4)).unwrap();
        let pages: Vec<_> = std::iter::from_fn(|| kmem.kalloc()).collect();
        assert_eq!(pages.len(), 16);
        assert_eq!(pages.iter().collect::<HashSet<_>>().len(), 16);
        for &pa in &pages {
            assert!(kmem.memory().page(pa).iter().all(|&b| b == JUNK_ALLOC));
        }
        for pa in pages {
            kmem.kfree(pa);
        }
        assert_eq!(kmem.free_pages(), 16);
    }
}

#[test]
fn two_hart_steal() {
    CpuManager::bind(0);
    let kmem = PerCpuKmem::new(PhysMemory::new(BASE, BASE + 2 * PGSIZE).unwrap(), 2).unwrap();
    let a = kmem.kalloc().unwrap();
    let b = kmem.kalloc().unwrap();
    assert_ne!(a, b);
    assert_eq!(kmem.steals(), 1);
    assert_eq!(kmem.kalloc(), None);
}

#[test]
fn harts_drain_and_refill_each_other() {
    let kmem = Arc::new(PerCpuKmem::new(PhysMemory::new(BASE, BASE + 32 * PGSIZE).unwrap(), 4).unwrap());

    // hart 0 拿走所有页，再由 hart 3 全部释放
    let pages: Vec<_> = {
        let kmem = Arc::clone(&kmem);
        thread::spawn(move || {
            CpuManager::bind(0);
            std::iter::from_fn(|| kmem.kalloc()).collect::<Vec<_>>()
        })
        .join()
        .unwrap()
    };
    assert_eq!(pages.len(), 32);
    assert_eq!(kmem.steals(), 24);

    {
        let kmem = Arc::clone(&kmem);
        thread::spawn(move || {
            CpuManager::bind(3);
            for pa in pages {
                kmem.kfree(pa);
            }
        })
        .join()
        .unwrap();
    }
    assert_eq!(kmem.free_count(3), 32);
    assert_eq!((0..3).map(|hart| kmem.free_count(hart)).sum::<usize>(), 0);
}

#[test]
fn fork_style_sharing_then_writes() {
    let kmem = CowKmem::new(PhysMemory::new(BASE, BASE + 8 * PGSIZE).unwrap());
    let parent = kmem.kalloc().unwrap();
    kmem.memory().page(parent)[..6].copy_from_slice(b"parent");

    // 子进程共享父进程的页
    assert_eq!(kmem.paref(parent), 2);

    // 子进程写入：得到私有副本
    let child = kmem.kcopy_and_unref(parent).unwrap();
    assert_ne!(child, parent);
    kmem.memory().page(child)[..5].copy_from_slice(b"child");
    assert_eq!(&kmem.memory().page(parent)[..6], b"parent");

    // 父进程写入：已独占，无需复制
    assert_eq!(kmem.kcopy_and_unref(parent), Ok(parent));
    assert_eq!(kmem.refcount(parent), 1);

    kmem.kfree(parent);
    kmem.kfree(child);
    assert_eq!(kmem.free_pages(), 8);
}
