//! 物理页分配器
//!
//! 以整页为单位分配物理内存，供用户进程、内核栈、页表页与管道缓冲区使用。
//! 提供两种互斥的实现：
//! - [`PerCpuKmem`]：每个 hart 一条空闲链表，本地链表耗尽时从其他 hart 窃取；
//! - [`CowKmem`]：一条全局空闲链表加每页引用计数，支持写时复制。

use crate::consts::{NCPU, PHYSTOP};
use crate::error::{Error, Result};
use super::addr::PhysAddr;
use super::list::LinkArena;
use super::phys::PhysMemory;

pub use cow::CowKmem;
pub use percpu::PerCpuKmem;

mod cow;
mod percpu;

/// 物理页分配器的公共接口。
pub trait PageAllocator: Send + Sync {
    /// 分配一个物理页。
    ///
    /// 返回的页内容被填充为 `JUNK_ALLOC`；物理内存耗尽时返回 `None`，由调用者决定如何处理。
    fn kalloc(&self) -> Option<PhysAddr>;

    /// 释放 `kalloc` 得到的物理页。
    ///
    /// 地址未对齐或不在可管理区间内属于内核缺陷，直接 panic。
    fn kfree(&self, pa: PhysAddr);

    /// 当前空闲页数
    fn free_pages(&self) -> usize;

    /// 分配器管理的物理内存
    fn memory(&self) -> &PhysMemory;

    /// 可管理的总页数
    fn total_pages(&self) -> usize {
        self.memory().npages()
    }
}

/// 分配器实现的选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KallocKind {
    /// 每 hart 空闲链表，带窃取
    PerCpu,
    /// 全局空闲链表，带写时复制引用计数
    Cow,
}

/// 分配器配置
#[derive(Debug, Clone, Copy)]
pub struct KmemConfig {
    /// 可用物理内存起点（通常是内核映像的结束地址）
    pub start: usize,
    /// 可用物理内存终点
    pub end: usize,
    /// hart 数量，仅 `PerCpu` 使用
    pub ncpu: usize,
    pub kind: KallocKind,
}

impl KmemConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ncpu == 0 {
            return Err(Error::InvalidConfig("ncpu must be at least 1"));
        }
        if self.start >= self.end || self.end > PHYSTOP {
            return Err(Error::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl Default for KmemConfig {
    fn default() -> Self {
        Self {
            start: crate::consts::KERNBASE + 0x20_0000,
            end: crate::consts::KERNBASE + 0x60_0000,
            ncpu: NCPU,
            kind: KallocKind::PerCpu,
        }
    }
}

/// 启动时选定的分配器实现
pub enum Kmem {
    PerCpu(PerCpuKmem),
    Cow(CowKmem),
}

impl Kmem {
    /// 按配置初始化分配器，所有物理页进入空闲状态。
    pub fn kinit(config: &KmemConfig) -> Result<Self> {
        config.validate()?;
        let mem = PhysMemory::new(config.start, config.end)?;
        Ok(match config.kind {
            KallocKind::PerCpu => Kmem::PerCpu(PerCpuKmem::new(mem, config.ncpu)?),
            KallocKind::Cow => Kmem::Cow(CowKmem::new(mem)),
        })
    }

    /// 写时复制接口仅由引用计数实现提供
    pub fn as_cow(&self) -> Option<&CowKmem> {
        match self {
            Kmem::Cow(kmem) => Some(kmem),
            Kmem::PerCpu(_) => None,
        }
    }

    pub fn as_percpu(&self) -> Option<&PerCpuKmem> {
        match self {
            Kmem::PerCpu(kmem) => Some(kmem),
            Kmem::Cow(_) => None,
        }
    }

    fn inner(&self) -> &dyn PageAllocator {
        match self {
            Kmem::PerCpu(kmem) => kmem,
            Kmem::Cow(kmem) => kmem,
        }
    }
}

impl PageAllocator for Kmem {
    fn kalloc(&self) -> Option<PhysAddr> {
        self.inner().kalloc()
    }

    fn kfree(&self, pa: PhysAddr) {
        self.inner().kfree(pa)
    }

    fn free_pages(&self) -> usize {
        self.inner().free_pages()
    }

    fn memory(&self) -> &PhysMemory {
        self.inner().memory()
    }
}

/// 一条空闲页链表，页帧下标通过共享的 `LinkArena` 串联。
///
/// 链表总是放在自旋锁里使用，持有守卫即可修改。
struct FreeList {
    head: usize,
    len: usize,
}

impl FreeList {
    /// `head` 是该链表在仓库中的哨兵下标
    fn new(links: &LinkArena, head: usize) -> Self {
        links.init(head);
        Self { head, len: 0 }
    }

    fn push(&mut self, links: &LinkArena, index: usize) {
        links.push_front(self.head, index);
        self.len += 1;
    }

    fn pop(&mut self, links: &LinkArena) -> Option<usize> {
        let index = links.pop_front(self.head)?;
        self.len -= 1;
        Some(index)
    }
}
