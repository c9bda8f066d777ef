//! 物理内存
//!
//! 内核映像之后到 `PHYSTOP` 之间的物理内存被切分成页帧，每个页帧的内容由一把自旋锁保护。
//! 页帧的身份就是它的物理地址，`PhysMemory` 负责地址与页帧下标之间的换算。

use core::ops::{Deref, DerefMut};

use crate::consts::PGSIZE;
use crate::error::{Error, Result};
use crate::spinlock::{SpinLock, SpinLockGuard};
use super::addr::{pg_round_down, pg_round_up, Addr, PhysAddr};

/// 一个物理页的内容
pub struct RawSinglePage {
    data: [u8; PGSIZE],
}

impl RawSinglePage {
    const fn new() -> Self {
        Self { data: [0; PGSIZE] }
    }

    /// 用同一个字节填满整页
    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }
}

impl Deref for RawSinglePage {
    type Target = [u8; PGSIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for RawSinglePage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// 可管理的物理内存区间 `[start, end)`。
pub struct PhysMemory {
    start: PhysAddr,
    end: PhysAddr,
    pages: Box<[SpinLock<RawSinglePage>]>,
}

impl PhysMemory {
    /// 将 `[start, end)` 切分为页帧。
    ///
    /// # 功能说明
    /// 起始地址向上、结束地址向下取整到页边界，只保留完整的页。
    ///
    /// # 可能的错误
    /// 取整后区间内容纳不下任何一页时返回 `Error::InvalidRange`。
    pub fn new(start: usize, end: usize) -> Result<Self> {
        let first = pg_round_up(start);
        let last = pg_round_down(end);
        if first >= last {
            return Err(Error::InvalidRange { start, end });
        }
        let npages = (last - first) / PGSIZE;
        let pages = (0..npages)
            .map(|_| SpinLock::new(RawSinglePage::new(), "page"))
            .collect();
        Ok(Self {
            start: PhysAddr::from_raw(first),
            end: PhysAddr::from_raw(last),
            pages,
        })
    }

    pub fn start(&self) -> PhysAddr {
        self.start
    }

    pub fn end(&self) -> PhysAddr {
        self.end
    }

    pub fn npages(&self) -> usize {
        self.pages.len()
    }

    /// 物理地址对应的页帧下标；未对齐或越界时返回 `None`。
    pub fn index_of(&self, pa: PhysAddr) -> Option<usize> {
        if !pa.is_page_aligned() || pa < self.start || pa >= self.end {
            return None;
        }
        Some(pa.page_num() - self.start.page_num())
    }

    /// 页帧下标对应的物理地址
    pub fn addr_of(&self, index: usize) -> PhysAddr {
        debug_assert!(index < self.pages.len());
        PhysAddr::from_raw(self.start.as_usize() + index * PGSIZE)
    }

    /// 锁住并访问 `pa` 处页帧的内容。
    ///
    /// 页帧的使用权属于分配得到它的子系统，这把锁只保证字节级访问不会相互撕裂。
    pub fn page(&self, pa: PhysAddr) -> SpinLockGuard<'_, RawSinglePage> {
        match self.index_of(pa) {
            Some(index) => self.pages[index].lock(),
            None => panic!("page: bad pa {:#x}", pa),
        }
    }

    pub(crate) fn page_at(&self, index: usize) -> SpinLockGuard<'_, RawSinglePage> {
        self.pages[index].lock()
    }

    /// 把 `src` 页的内容复制到 `dst` 页。
    ///
    /// 先复制到临时缓冲区，任何时刻只持有一把页锁。
    pub fn copy_page(&self, src: PhysAddr, dst: PhysAddr) {
        let tmp: [u8; PGSIZE] = **self.page(src);
        self.page(dst).copy_from_slice(&tmp);
    }
}
