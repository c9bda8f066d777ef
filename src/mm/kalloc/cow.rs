//! 带引用计数的全局分配器，支持写时复制
//!
//! 所有空闲页挂在一条全局链表上；每个页帧另有一个引用计数，表示有多少个映射共享它。
//! 空闲链表与引用计数表各用一把锁，查询计数不必等待链表操作。

use crate::consts::{JUNK_ALLOC, JUNK_FREE};
use crate::error::{Error, Result};
use crate::mm::addr::PhysAddr;
use crate::mm::list::LinkArena;
use crate::mm::phys::PhysMemory;
use crate::spinlock::SpinLock;
use super::{FreeList, PageAllocator};

/// 写时复制分配器。
///
/// # 不变式
/// 每个页帧要么计数为 0 且挂在空闲链表上，要么计数不小于 1 且不在链表上。
pub struct CowKmem {
    mem: PhysMemory,
    links: LinkArena,
    free: SpinLock<FreeList>,
    refs: SpinLock<Box<[u32]>>,
}

impl CowKmem {
    /// 初始化分配器，所有页帧计数为 0 并挂入空闲链表。
    pub fn new(mem: PhysMemory) -> Self {
        let npages = mem.npages();
        let links = LinkArena::new(npages + 1);
        let mut free = FreeList::new(&links, npages);
        for index in 0..npages {
            mem.page_at(index).fill(JUNK_FREE);
            free.push(&links, index);
        }

        log::info!(
            "kmem: {} copy-on-write pages [{:#x}, {:#x})",
            npages,
            mem.start(),
            mem.end()
        );

        Self {
            mem,
            links,
            free: SpinLock::new(free, "kmem"),
            refs: SpinLock::new(vec![0; npages].into_boxed_slice(), "kmem_ref"),
        }
    }

    fn index(&self, pa: PhysAddr, op: &str) -> usize {
        match self.mem.index_of(pa) {
            Some(index) => index,
            None => panic!("{}: bad pa {:#x}", op, pa),
        }
    }

    /// 查询页帧当前的引用计数
    pub fn refcount(&self, pa: PhysAddr) -> usize {
        let index = self.index(pa, "refcount");
        self.refs.lock()[index] as usize
    }

    /// 为已持有的页帧增加一个共享者，返回新的计数。
    ///
    /// 复制地址空间时，每建立一个指向同一页帧的新映射就调用一次。
    ///
    /// # 可能的错误
    /// 对空闲页（计数为 0）调用属于内核缺陷，直接 panic。
    pub fn paref(&self, pa: PhysAddr) -> usize {
        let index = self.index(pa, "paref");
        let mut refs = self.refs.lock();
        if refs[index] == 0 {
            panic!("paref: free page {:#x}", pa);
        }
        refs[index] += 1;
        refs[index] as usize
    }

    /// 写时复制的核心：为即将写入的映射取得一个独占的页帧。
    ///
    /// # 功能说明
    /// - 计数不大于 1：该映射独占页帧，原样返回，不需要复制；
    /// - 否则分配新页，复制旧页内容，再释放该映射在旧页上的份额，返回新页。
    ///
    /// # 可能的错误
    /// - 分配新页失败时返回 `Error::OutOfMemory`，旧页的计数保持不变；
    /// - 对空闲页（计数为 0）调用时 panic，该页仍在空闲链表上，不属于任何映射。
    pub fn kcopy_and_unref(&self, pa: PhysAddr) -> Result<PhysAddr> {
        let index = self.index(pa, "kcopy_and_unref");
        match self.refs.lock()[index] {
            0 => panic!("kcopy_and_unref: free page {:#x}", pa),
            1 => return Ok(pa),
            _ => {}
        }

        let new = self.kalloc().ok_or(Error::OutOfMemory)?;
        self.mem.copy_page(pa, new);
        // 其他共享者可能已经释放，此时这里的释放让旧页回到空闲链表
        self.kfree(pa);
        log::trace!("cow: {:#x} -> {:#x}", pa, new);
        Ok(new)
    }
}

impl PageAllocator for CowKmem {
    fn kalloc(&self) -> Option<PhysAddr> {
        let index = self.free.lock().pop(&self.links)?;
        self.refs.lock()[index] = 1;
        self.mem.page_at(index).fill(JUNK_ALLOC);
        Some(self.mem.addr_of(index))
    }

    /// 释放一个共享者的份额。
    ///
    /// # 功能说明
    /// 在计数锁下减一；只有计数降到 0 时才填充 `JUNK_FREE` 并挂回空闲链表。
    /// 对计数已为 0 的页再次释放时计数保持为 0，只记录警告，不会把页重复挂入链表。
    fn kfree(&self, pa: PhysAddr) {
        let index = self.index(pa, "kfree");
        let mut refs = self.refs.lock();
        if refs[index] == 0 {
            drop(refs);
            log::warn!("kfree: refcount underflow on {:#x}, clamped at 0", pa);
            return;
        }
        refs[index] -= 1;
        let last = refs[index] == 0;
        drop(refs);

        if last {
            self.mem.page_at(index).fill(JUNK_FREE);
            self.free.lock().push(&self.links, index);
        }
    }

    fn free_pages(&self) -> usize {
        self.free.lock().len
    }

    fn memory(&self) -> &PhysMemory {
        &self.mem
    }
}
