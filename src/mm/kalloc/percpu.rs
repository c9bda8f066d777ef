//! 每 hart 空闲链表分配器
//!
//! 每个 hart 拥有一条独立加锁的空闲链表，常见情况下只与自己竞争。
//! 本地链表耗尽时按 hart 编号递增的顺序依次锁住其他链表，窃取第一个可用的页。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::consts::{JUNK_ALLOC, JUNK_FREE};
use crate::error::{Error, Result};
use crate::mm::addr::PhysAddr;
use crate::mm::list::LinkArena;
use crate::mm::phys::PhysMemory;
use crate::process::{pop_off, push_off, CpuManager};
use crate::spinlock::SpinLock;
use super::{FreeList, PageAllocator};

/// 每 hart 空闲链表分配器。
///
/// # 字段说明
/// - `mem`: 被管理的物理内存；
/// - `links`: 页帧链接仓库，前 `npages` 项对应页帧，其后每个 hart 一个哨兵；
/// - `lists`: 每个 hart 的空闲链表；
/// - `steals`: 从其他 hart 窃取成功的次数。
pub struct PerCpuKmem {
    mem: PhysMemory,
    links: LinkArena,
    lists: Box<[SpinLock<FreeList>]>,
    steals: AtomicU64,
}

impl PerCpuKmem {
    /// 初始化分配器，把所有页帧按轮转方式均分给各个 hart。
    ///
    /// # 功能说明
    /// 此时处于初始化阶段，由单个执行流完成，不存在争用。
    /// 每个页在挂入链表前都会被填充为 `JUNK_FREE`。
    ///
    /// # 可能的错误
    /// `ncpu` 为 0 时返回 `Error::InvalidConfig`。
    pub fn new(mem: PhysMemory, ncpu: usize) -> Result<Self> {
        if ncpu == 0 {
            return Err(Error::InvalidConfig("ncpu must be at least 1"));
        }
        let npages = mem.npages();
        let links = LinkArena::new(npages + ncpu);
        let lists: Box<[SpinLock<FreeList>]> = (0..ncpu)
            .map(|hart| SpinLock::new(FreeList::new(&links, npages + hart), "kmem"))
            .collect();

        for index in 0..npages {
            mem.page_at(index).fill(JUNK_FREE);
            lists[index % ncpu].lock().push(&links, index);
        }

        log::info!(
            "kmem: {} pages [{:#x}, {:#x}) across {} harts",
            npages,
            mem.start(),
            mem.end(),
            ncpu
        );

        Ok(Self {
            mem,
            links,
            lists,
            steals: AtomicU64::new(0),
        })
    }

    /// hart 数量
    pub fn ncpu(&self) -> usize {
        self.lists.len()
    }

    /// 指定 hart 空闲链表上的页数
    pub fn free_count(&self, hart: usize) -> usize {
        self.lists[hart].lock().len
    }

    /// 窃取成功的总次数
    pub fn steals(&self) -> u64 {
        self.steals.load(Ordering::Relaxed)
    }

    fn my_list(&self) -> (usize, &SpinLock<FreeList>) {
        let id = CpuManager::cpu_id();
        match self.lists.get(id) {
            Some(list) => (id, list),
            None => panic!("kmem: hart {} has no free list ({} harts)", id, self.lists.len()),
        }
    }

    fn steal(&self, id: usize) -> Option<usize> {
        for (victim, list) in self.lists.iter().enumerate() {
            if victim == id {
                continue;
            }
            let stolen = list.lock().pop(&self.links);
            if let Some(index) = stolen {
                self.steals.fetch_add(1, Ordering::Relaxed);
                log::debug!("kalloc: hart {} stole page {} from hart {}", id, index, victim);
                return Some(index);
            }
        }
        None
    }
}

impl PageAllocator for PerCpuKmem {
    /// 分配一个物理页。
    ///
    /// # 流程解释
    /// 1. 关闭中断，保证确定 hart 编号到操作完链表之间不会被迁移；
    /// 2. 从本 hart 的链表弹出一页；
    /// 3. 本地为空时释放本地锁，再依次尝试其他 hart 的链表；
    /// 4. 恢复中断，在锁外用 `JUNK_ALLOC` 填充页内容。
    fn kalloc(&self) -> Option<PhysAddr> {
        push_off();
        let (id, list) = self.my_list();
        let mut index = list.lock().pop(&self.links);
        if index.is_none() {
            index = self.steal(id);
        }
        pop_off();

        let index = index?;
        self.mem.page_at(index).fill(JUNK_ALLOC);
        Some(self.mem.addr_of(index))
    }

    /// 释放物理页，挂入当前 hart 的空闲链表。
    ///
    /// # 可能的错误
    /// - 地址未对齐或越界：panic；
    /// - 页已经在某条空闲链表上（重复释放）：panic。
    fn kfree(&self, pa: PhysAddr) {
        let index = match self.mem.index_of(pa) {
            Some(index) => index,
            None => panic!("kfree: bad pa {:#x}", pa),
        };
        if self.links.is_linked(index) {
            panic!("kfree: double free {:#x}", pa);
        }

        // Fill with junk to catch dangling refs.
        self.mem.page_at(index).fill(JUNK_FREE);

        push_off();
        let (_, list) = self.my_list();
        list.lock().push(&self.links, index);
        pop_off();
    }

    fn free_pages(&self) -> usize {
        self.lists.iter().map(|list| list.lock().len).sum()
    }

    fn memory(&self) -> &PhysMemory {
        &self.mem
    }
}
