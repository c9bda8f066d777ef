//! 缓存层
//!
//! 缓冲区缓存是一组固定数量的缓冲块，保存磁盘块内容在内存中的副本。
//! 缓存既减少了磁盘读取，也为多个执行流共同使用的磁盘块提供了同步点。
//!
//! 接口：
//! * 获取某个磁盘块的缓冲块，调用 `bread`；
//! * 修改缓冲块数据之后，调用 `bwrite` 写回磁盘；
//! * 使用完毕后释放缓冲块（`brelse` 或直接丢弃 `Buf`）；
//! * 同一时刻只有一个执行流能使用某个缓冲块，不要持有过久。
//!
//! 缓冲块按块号散列到若干个桶中，每个桶一把自旋锁，保护桶内链表、引用计数与块身份。
//! 命中只需要一把桶锁；未命中时先取得全局置换锁，再按桶号顺序扫描所有桶，
//! 在全部引用计数为 0 的缓冲块中选出最后访问时间最早的一个重新分配。

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::clock::Clock;
use crate::consts::{BSIZE, NBUCKET, NBUF, NODEV};
use crate::driver::BlockDevice;
use crate::error::{Error, Result};
use crate::mm::list::LinkArena;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{SpinLock, SpinLockGuard};

bitflags! {
    /// 缓冲块状态
    pub struct BufFlags: u8 {
        /// 数据已经从磁盘读入
        const VALID = 1 << 0;
        /// 磁盘正在使用该缓冲块
        const DISK = 1 << 1;
    }
}

/// 缓存的几何配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcacheConfig {
    /// 缓冲块数量
    pub nbuf: usize,
    /// 哈希桶数量
    pub nbucket: usize,
}

impl BcacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nbuf == 0 {
            return Err(Error::InvalidConfig("nbuf must be at least 1"));
        }
        if self.nbucket == 0 {
            return Err(Error::InvalidConfig("nbucket must be at least 1"));
        }
        if self.nbuf > NODEV as usize {
            return Err(Error::InvalidConfig("nbuf too large"));
        }
        Ok(())
    }
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self {
            nbuf: NBUF,
            nbucket: NBUCKET,
        }
    }
}

/// 缓存统计的快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BcacheStats {
    /// 在桶中直接找到缓冲块的次数（含置换锁下的二次查找）
    pub hits: u64,
    /// 需要重新分配缓冲块的次数
    pub misses: u64,
    /// 重新分配时挤出了某个磁盘块的次数（不含从未使用过的缓冲块）
    pub evictions: u64,
    /// 磁盘读取次数
    pub reads: u64,
    /// 磁盘写入次数
    pub writes: u64,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// 缓冲区缓存。
///
/// # 字段说明
/// - `evict`: 全局置换锁，串行化所有跨桶的重新分配；
/// - `buckets`: 哈希桶，每个桶是一条以哨兵为头的循环双向链表；
/// - `links`: 链接仓库，前 `nbuf` 项是缓冲块，其后每个桶一个哨兵；
/// - `ctrls`: 每个缓冲块的身份、引用计数与最后访问时间，由所在桶的锁保护；
/// - `bufs`: 每个缓冲块的状态与数据，数据由睡眠锁保护；
/// - `disk`: 块设备；
/// - `clock`: 时间源，用于记录最后访问时间。
pub struct Bcache {
    evict: SpinLock<()>,
    buckets: Box<[SpinLock<Bucket>]>,
    links: LinkArena,
    ctrls: Box<[BufCtrl]>,
    bufs: Box<[BufInner]>,
    disk: Arc<dyn BlockDevice>,
    clock: Arc<dyn Clock>,
    stats: Stats,
}

impl Bcache {
    /// 创建并初始化缓冲区缓存。
    ///
    /// # 功能说明
    /// 所有缓冲块都还未分配给任何磁盘块：第 `i` 个缓冲块的身份记为 `(NODEV, i)`，
    /// 因此它被放入第 `i % nbucket` 个桶，最后访问时间为当前滴答数。
    ///
    /// # 可能的错误
    /// 配置不合法时返回 `Error::InvalidConfig`。
    pub fn new(
        config: BcacheConfig,
        disk: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let BcacheConfig { nbuf, nbucket } = config;

        let links = LinkArena::new(nbuf + nbucket);
        let buckets: Box<[SpinLock<Bucket>]> = (0..nbucket)
            .map(|i| SpinLock::new(Bucket::new(&links, nbuf + i), "bcache"))
            .collect();

        let now = clock.ticks();
        let ctrls: Box<[BufCtrl]> = (0..nbuf).map(|i| BufCtrl::new(i as u32, now)).collect();
        for i in 0..nbuf {
            buckets[i % nbucket].lock().insert(&links, i);
        }

        log::info!("bcache: {} buffers of {} bytes in {} buckets", nbuf, BSIZE, nbucket);

        Ok(Self {
            evict: SpinLock::new((), "bcache_evict"),
            buckets,
            links,
            ctrls,
            bufs: (0..nbuf).map(|_| BufInner::new()).collect(),
            disk,
            clock,
            stats: Stats::default(),
        })
    }

    pub fn nbuf(&self) -> usize {
        self.ctrls.len()
    }

    pub fn nbucket(&self) -> usize {
        self.buckets.len()
    }

    pub fn stats(&self) -> BcacheStats {
        BcacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }

    /// 查询块是否在缓存中，返回所在缓冲块的下标，不增加引用计数。
    pub fn cached(&self, dev: u32, blockno: u32) -> Option<usize> {
        let bucket = self.buckets[self.hash(blockno)].lock();
        self.find_cached(&bucket, dev, blockno)
    }

    /// 返回一个已加锁、内容有效的缓冲块。
    ///
    /// 块不在缓存中或缓冲块刚被重新分配时，从磁盘同步读入。
    /// 调用者用完后必须释放（`brelse` 或丢弃返回值）。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut b = self.bget(dev, blockno);
        if !self.bufs[b.index].flags().contains(BufFlags::VALID) {
            self.rw(&mut b, false);
            self.bufs[b.index].set(BufFlags::VALID);
        }
        b
    }

    #[inline]
    fn hash(&self, blockno: u32) -> usize {
        blockno as usize % self.buckets.len()
    }

    /// 在已加锁的桶中查找块
    fn find_cached(&self, bucket: &Bucket, dev: u32, blockno: u32) -> Option<usize> {
        self.links
            .iter(bucket.head)
            .find(|&index| self.ctrls[index].is(dev, blockno))
    }

    /// 在缓存中查找块，未找到时重新分配一个缓冲块。两种情况下都返回已加锁的缓冲块。
    ///
    /// # 流程解释
    /// 1. 锁住目标桶查找，命中则增加引用计数、释放桶锁，再休眠等待缓冲块的睡眠锁；
    /// 2. 未命中时取得置换锁，重新锁住目标桶再查一次：
    ///    可能有多个访问同一块的执行流到达这里，置换锁保证只有一个完成分配，其余的会在这里命中；
    /// 3. 按桶号顺序扫描所有桶，寻找引用计数为 0 且最后访问时间最早的缓冲块。
    ///    选中者所在桶的锁一直持有，找到更早的候选时才释放它；没有候选的桶立即释放。
    ///    任何时刻最多同时持有两把桶锁，且总是按桶号递增的顺序获取，不会形成环路等待；
    /// 4. 改写选中缓冲块的身份，如果它不在目标桶中，先从旧桶摘除，释放旧桶锁后再挂入目标桶；
    /// 5. 释放置换锁，休眠等待缓冲块的睡眠锁。
    ///
    /// # 可能的错误
    /// 所有缓冲块都在使用中时 panic：固定大小的缓存被占满说明上层违反了使用约定。
    fn bget(&self, dev: u32, blockno: u32) -> Buf<'_> {
        if dev == NODEV {
            panic!("bget: dev {:#x} is reserved", dev);
        }
        let id = self.hash(blockno);

        // Is the block already cached?
        let bucket = self.buckets[id].lock();
        if let Some(index) = self.find_cached(&bucket, dev, blockno) {
            self.ctrls[index].refcnt.fetch_add(1, Ordering::Relaxed);
            drop(bucket);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("bcache: hit ({}, {}) in slot {}", dev, blockno, index);
            return self.lock_buf(index, dev, blockno);
        }
        drop(bucket);

        let evict = self.evict.lock();

        let bucket = self.buckets[id].lock();
        if let Some(index) = self.find_cached(&bucket, dev, blockno) {
            self.ctrls[index].refcnt.fetch_add(1, Ordering::Relaxed);
            drop(bucket);
            drop(evict);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return self.lock_buf(index, dev, blockno);
        }
        drop(bucket);

        // Not cached.
        // Recycle the least recently used (LRU) unused buffer.
        let mut victim: Option<(usize, u64)> = None;
        let mut held: Option<(usize, SpinLockGuard<'_, Bucket>)> = None;
        for (i, lock) in self.buckets.iter().enumerate() {
            let bucket = lock.lock();
            let mut found = false;
            for index in self.links.iter_rev(bucket.head) {
                let ctrl = &self.ctrls[index];
                if ctrl.refcnt.load(Ordering::Relaxed) > 0 {
                    continue;
                }
                let tick = ctrl.last_access.load(Ordering::Relaxed);
                if victim.map_or(true, |(_, oldest)| tick < oldest) {
                    victim = Some((index, tick));
                    found = true;
                }
            }
            if found {
                // 替换掉之前持有的候选桶，旧守卫在这里释放
                held = Some((i, bucket));
            }
        }

        let (index, from, mut old) = match (victim, held) {
            (Some((index, _)), Some((from, guard))) => (index, from, guard),
            _ => panic!("bget: no buffers"),
        };

        let ctrl = &self.ctrls[index];
        let old_dev = ctrl.dev.load(Ordering::Relaxed);
        if old_dev != NODEV {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "bcache: evict ({}, {}) from slot {} for ({}, {})",
                old_dev,
                ctrl.blockno.load(Ordering::Relaxed),
                index,
                dev,
                blockno
            );
        }
        ctrl.dev.store(dev, Ordering::Relaxed);
        ctrl.blockno.store(blockno, Ordering::Relaxed);
        ctrl.refcnt.store(1, Ordering::Relaxed);
        self.bufs[index].clear(BufFlags::VALID);

        if from != id {
            old.remove(&self.links, index);
        }
        drop(old);
        if from != id {
            self.buckets[id].lock().insert(&self.links, index);
        }

        drop(evict);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.lock_buf(index, dev, blockno)
    }

    fn lock_buf(&self, index: usize, dev: u32, blockno: u32) -> Buf<'_> {
        Buf {
            cache: self,
            index,
            dev,
            blockno,
            // 持有期间可能正在进行 I/O，所以用睡眠锁
            data: Some(self.bufs[index].data.lock()),
        }
    }

    /// 通过块设备同步读写缓冲块，调用者持有缓冲块的睡眠锁
    fn rw(&self, b: &mut Buf<'_>, writing: bool) {
        let inner = &self.bufs[b.index];
        inner.set(BufFlags::DISK);
        let (dev, blockno) = (b.dev, b.blockno);
        self.disk.rw(dev, blockno, b.data_mut(), writing);
        inner.clear(BufFlags::DISK);

        let counter = if writing { &self.stats.writes } else { &self.stats.reads };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 引用计数减一；降到 0 时记录当前滴答数为最后访问时间。
    ///
    /// 之后的置换会优先选择更早被释放的缓冲块。
    fn brelse(&self, index: usize, blockno: u32) {
        let _bucket = self.buckets[self.hash(blockno)].lock();
        let ctrl = &self.ctrls[index];
        let refcnt = ctrl.refcnt.load(Ordering::Relaxed);
        if refcnt == 0 {
            panic!("brelse: refcnt underflow on slot {}", index);
        }
        ctrl.refcnt.store(refcnt - 1, Ordering::Relaxed);
        if refcnt == 1 {
            // no one is waiting for it.
            ctrl.last_access.store(self.clock.ticks(), Ordering::Relaxed);
        }
    }

    fn pin(&self, index: usize, blockno: u32) {
        let _bucket = self.buckets[self.hash(blockno)].lock();
        self.ctrls[index].refcnt.fetch_add(1, Ordering::Relaxed);
    }

    fn unpin(&self, index: usize, blockno: u32) {
        let _bucket = self.buckets[self.hash(blockno)].lock();
        let ctrl = &self.ctrls[index];
        let refcnt = ctrl.refcnt.load(Ordering::Relaxed);
        if refcnt <= 1 {
            panic!("unpin");
        }
        ctrl.refcnt.store(refcnt - 1, Ordering::Relaxed);
    }
}

/// 已加锁的缓冲块。
///
/// 持有 `Buf` 即持有缓冲块的睡眠锁与一个引用计数；丢弃时释放两者。
pub struct Buf<'a> {
    cache: &'a Bcache,
    index: usize,
    dev: u32,
    blockno: u32,
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    /// 缓冲块在缓存中的下标
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn flags(&self) -> BufFlags {
        self.cache.bufs[self.index].flags()
    }

    /// 当前执行流是否持有该缓冲块的睡眠锁
    pub fn holding(&self) -> bool {
        self.data.as_ref().map_or(false, |guard| guard.holding())
    }

    pub fn data(&self) -> &BufData {
        match self.data.as_ref() {
            Some(guard) => &**guard,
            None => panic!("buf: data released"),
        }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        match self.data.as_mut() {
            Some(guard) => &mut **guard,
            None => panic!("buf: data released"),
        }
    }

    /// 将缓冲块内容写回磁盘，不释放锁。
    ///
    /// # 可能的错误
    /// 当前执行流未持有缓冲块的睡眠锁时 panic。
    pub fn bwrite(&mut self) {
        if !self.holding() {
            panic!("bwrite");
        }
        let cache = self.cache;
        cache.rw(self, true);
    }

    /// 钉住缓冲块：额外增加一个引用计数，使它在本次释放之后仍不会被置换。
    ///
    /// 日志层在事务提交之前用它保证已修改的块留在缓存中。
    pub fn pin(&self) {
        self.cache.pin(self.index, self.blockno);
    }

    /// 撤销一次 `pin`。
    ///
    /// # 可能的错误
    /// 没有与之配对的 `pin` 时 panic。
    pub fn unpin(&self) {
        self.cache.unpin(self.index, self.blockno);
    }

    /// 释放缓冲块，等价于丢弃它。
    pub fn brelse(self) {
        drop(self);
    }
}

impl<'a> Drop for Buf<'a> {
    /// 释放睡眠锁，再在桶锁下减少引用计数。
    ///
    /// 正在 panic 展开时不检查锁纪律，避免二次 panic。
    fn drop(&mut self) {
        if !self.holding() && !thread::panicking() {
            panic!("brelse");
        }
        drop(self.data.take());
        self.cache.brelse(self.index, self.blockno);
    }
}

/// 一个哈希桶
struct Bucket {
    head: usize,
    len: usize,
}

impl Bucket {
    fn new(links: &LinkArena, head: usize) -> Self {
        links.init(head);
        Self { head, len: 0 }
    }

    fn insert(&mut self, links: &LinkArena, index: usize) {
        links.push_front(self.head, index);
        self.len += 1;
    }

    fn remove(&mut self, links: &LinkArena, index: usize) {
        links.remove(index);
        self.len -= 1;
    }
}

/// 缓冲块的控制信息，受所在桶的锁保护
struct BufCtrl {
    dev: AtomicU32,
    blockno: AtomicU32,
    refcnt: AtomicUsize,
    last_access: AtomicU64,
}

impl BufCtrl {
    fn new(blockno: u32, now: u64) -> Self {
        Self {
            dev: AtomicU32::new(NODEV),
            blockno: AtomicU32::new(blockno),
            refcnt: AtomicUsize::new(0),
            last_access: AtomicU64::new(now),
        }
    }

    #[inline]
    fn is(&self, dev: u32, blockno: u32) -> bool {
        self.dev.load(Ordering::Relaxed) == dev && self.blockno.load(Ordering::Relaxed) == blockno
    }
}

/// 缓冲块的状态与数据
struct BufInner {
    flags: AtomicU8,
    data: SleepLock<BufData>,
}

impl BufInner {
    fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }

    fn flags(&self) -> BufFlags {
        BufFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set(&self, flags: BufFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Release);
    }

    fn clear(&self, flags: BufFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Release);
    }
}

/// 一个磁盘块的数据
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Ticks;
    use crate::driver::RamDisk;
    use std::time::Duration;

    const DEV: u32 = 1;

    fn cache(nbuf: usize, nbucket: usize) -> (Bcache, Arc<RamDisk>, Arc<Ticks>) {
        let disk = Arc::new(RamDisk::new(64));
        let ticks = Arc::new(Ticks::new());
        let bcache = Bcache::new(
            BcacheConfig { nbuf, nbucket },
            disk.clone(),
            ticks.clone(),
        )
        .unwrap();
        (bcache, disk, ticks)
    }

    fn refcnt(bcache: &Bcache, index: usize) -> usize {
        bcache.ctrls[index].refcnt.load(Ordering::Relaxed)
    }

    fn claims(bcache: &Bcache, dev: u32, blockno: u32) -> usize {
        bcache.ctrls.iter().filter(|c| c.is(dev, blockno)).count()
    }

    #[test]
    fn buffers_start_spread_over_buckets() {
        let (bcache, _, _) = cache(7, 3);
        assert_eq!((bcache.nbuf(), bcache.nbucket()), (7, 3));
        let lens: Vec<_> = bcache.buckets.iter().map(|b| b.lock().len).collect();
        assert_eq!(lens, vec![3, 2, 2]);
        assert!((0..7).all(|i| refcnt(&bcache, i) == 0));
    }

    #[test]
    fn invalid_config() {
        let disk = Arc::new(RamDisk::new(1));
        let ticks = Arc::new(Ticks::new());
        let err = Bcache::new(BcacheConfig { nbuf: 0, nbucket: 1 }, disk.clone(), ticks.clone());
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        let err = Bcache::new(BcacheConfig { nbuf: 1, nbucket: 0 }, disk, ticks);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn hit_returns_same_slot_and_reads_once() {
        let (bcache, disk, _) = cache(4, 2);
        let index = bcache.bread(DEV, 5).index();
        let again = bcache.bread(DEV, 5);
        assert_eq!(again.index(), index);
        assert!(again.flags().contains(BufFlags::VALID));
        assert!(!again.flags().contains(BufFlags::DISK));
        assert_eq!(disk.reads(), 1);
        assert_eq!(refcnt(&bcache, index), 1);
        drop(again);
        assert_eq!(refcnt(&bcache, index), 0);
        let stats = bcache.stats();
        assert_eq!((stats.hits, stats.misses, stats.evictions, stats.reads), (1, 1, 0, 1));
    }

    #[test]
    fn bread_loads_disk_contents() {
        let (bcache, disk, _) = cache(2, 1);
        let mut block = [0u8; BSIZE];
        block[..3].copy_from_slice(b"abc");
        disk.poke(DEV, 9, &block);
        let b = bcache.bread(DEV, 9);
        assert_eq!(&b.data()[..3], b"abc");
    }

    #[test]
    fn bwrite_reaches_disk_without_releasing() {
        let (bcache, disk, _) = cache(2, 1);
        let mut b = bcache.bread(DEV, 3);
        b.data_mut()[0] = 0x5a;
        b.bwrite();
        assert!(b.holding());
        assert_eq!(disk.peek(DEV, 3)[0], 0x5a);
        assert_eq!(disk.writes(), 1);
        assert_eq!(bcache.stats().writes, 1);
    }

    #[test]
    fn three_slots_two_buckets() {
        let (bcache, disk, ticks) = cache(3, 2);
        let (a, b, c, d) = (1, 2, 3, 4);

        let ba = bcache.bread(DEV, a);
        let bb = bcache.bread(DEV, b);
        let bc = bcache.bread(DEV, c);
        let (ia, ib, ic) = (ba.index(), bb.index(), bc.index());
        assert_eq!(disk.reads(), 3);

        ticks.clock_intr();
        drop(ba);
        let bd = bcache.bread(DEV, d);
        assert_eq!(bd.index(), ia);
        assert_eq!(bcache.cached(DEV, a), None);
        drop(bd);
        drop(bb);
        drop(bc);

        assert_eq!(bcache.bread(DEV, b).index(), ib);
        assert_eq!(bcache.bread(DEV, c).index(), ic);
        assert_eq!(disk.reads(), 4);
        assert_eq!(bcache.stats().evictions, 1);
    }

    #[test]
    fn oldest_release_is_recycled_first() {
        let (bcache, _, ticks) = cache(3, 2);
        let mut slots = Vec::new();
        let bufs: Vec<_> = [1, 2, 3].iter().map(|&n| bcache.bread(DEV, n)).collect();
        for b in bufs {
            ticks.clock_intr();
            slots.push(b.index());
            drop(b);
        }

        // 释放顺序 1 < 2 < 3：依次被置换
        assert_eq!(bcache.bread(DEV, 10).index(), slots[0]);
        assert_eq!(bcache.cached(DEV, 2), Some(slots[1]));
        ticks.clock_intr();
        assert_eq!(bcache.bread(DEV, 11).index(), slots[1]);
        assert_eq!(bcache.cached(DEV, 3), Some(slots[2]));
    }

    #[test]
    fn lru_is_global_across_buckets() {
        let (bcache, _, ticks) = cache(4, 4);
        // 块 0..4 各落在不同的桶中，释放顺序是 3, 1, 0, 2
        let bufs: Vec<_> = (0..4).map(|n| bcache.bread(DEV, n)).collect();
        let mut bufs: Vec<Option<Buf<'_>>> = bufs.into_iter().map(Some).collect();
        for &n in &[3usize, 1, 0, 2] {
            ticks.clock_intr();
            bufs[n].take();
        }
        let oldest = bcache.cached(DEV, 3).unwrap();

        let b = bcache.bread(DEV, 5);
        assert_eq!(b.index(), oldest);
        assert_eq!(bcache.cached(DEV, 3), None);
        // 被移动到块 5 所在的桶
        assert_eq!(bcache.buckets[1].lock().len, 2);
        assert_eq!(bcache.buckets[3].lock().len, 0);
    }

    #[test]
    fn held_buffers_are_never_recycled() {
        let (bcache, _, ticks) = cache(2, 2);
        let held = bcache.bread(DEV, 1);
        ticks.clock_intr();
        bcache.bread(DEV, 2).brelse();

        let b = bcache.bread(DEV, 3);
        assert_ne!(b.index(), held.index());
        assert_eq!(bcache.cached(DEV, 1), Some(held.index()));
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn exhaustion_is_fatal() {
        let (bcache, _, _) = cache(2, 1);
        let _a = bcache.bread(DEV, 1);
        let _b = bcache.bread(DEV, 2);
        let _c = bcache.bread(DEV, 3);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn pinned_buffer_is_not_evictable() {
        let (bcache, _, _) = cache(1, 1);
        let b = bcache.bread(DEV, 1);
        b.pin();
        drop(b);
        let _other = bcache.bread(DEV, 2);
    }

    #[test]
    fn unpin_makes_buffer_evictable_again() {
        let (bcache, _, _) = cache(1, 1);
        let b = bcache.bread(DEV, 1);
        let index = b.index();
        b.pin();
        assert_eq!(refcnt(&bcache, index), 2);
        drop(b);
        assert_eq!(refcnt(&bcache, index), 1);

        let b = bcache.bread(DEV, 1);
        b.unpin();
        drop(b);
        assert_eq!(refcnt(&bcache, index), 0);
        assert_eq!(bcache.bread(DEV, 2).index(), index);
    }

    #[test]
    #[should_panic(expected = "unpin")]
    fn unpin_without_pin() {
        let (bcache, _, _) = cache(1, 1);
        let b = bcache.bread(DEV, 1);
        b.unpin();
    }

    #[test]
    #[should_panic(expected = "is reserved")]
    fn reserved_dev() {
        let (bcache, _, _) = cache(1, 1);
        bcache.bread(NODEV, 0);
    }

    #[test]
    fn bwrite_without_lock_is_fatal() {
        let (bcache, disk, _) = cache(2, 1);
        let mut b = bcache.bread(DEV, 1);
        b.data_mut()[0] = 1;
        let index = b.index();

        let err = thread::scope(|s| s.spawn(move || b.bwrite()).join()).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"bwrite"));
        assert_eq!(disk.writes(), 0);
        // 展开时缓冲块仍被正常释放
        assert_eq!(refcnt(&bcache, index), 0);
        assert!(!bcache.bufs[index].data.is_locked());
    }

    #[test]
    fn brelse_without_lock_is_fatal() {
        let (bcache, _, _) = cache(2, 1);
        let b = bcache.bread(DEV, 1);
        let err = thread::scope(|s| s.spawn(move || b.brelse()).join()).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"brelse"));
    }

    #[test]
    fn waiter_sleeps_while_io_in_flight() {
        let disk = Arc::new(RamDisk::new(8).with_latency(Duration::from_millis(20)));
        let ticks = Arc::new(Ticks::new());
        let bcache = Bcache::new(BcacheConfig { nbuf: 4, nbucket: 2 }, disk.clone(), ticks).unwrap();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let b = bcache.bread(DEV, 6);
                    assert!(b.flags().contains(BufFlags::VALID));
                });
            }
        });
        assert_eq!(disk.reads(), 1);
        assert_eq!(claims(&bcache, DEV, 6), 1);
    }

    #[test]
    fn concurrent_lookups_keep_identities_unique() {
        const THREADS: usize = 6;
        const ROUNDS: usize = 200;
        let (bcache, disk, ticks) = cache(THREADS, 3);

        thread::scope(|s| {
            for t in 0..THREADS {
                let bcache = &bcache;
                let ticks = &ticks;
                s.spawn(move || {
                    for round in 0..ROUNDS {
                        let blockno = ((t * 7 + round * 3) % 10) as u32;
                        let mut b = bcache.bread(DEV, blockno);
                        assert_eq!(claims(bcache, DEV, blockno), 1);
                        let mut counter = [0u8; 8];
                        counter.copy_from_slice(&b.data()[..8]);
                        let next = u64::from_le_bytes(counter) + 1;
                        b.data_mut()[..8].copy_from_slice(&next.to_le_bytes());
                        b.bwrite();
                        drop(b);
                        if round % 16 == 0 {
                            ticks.clock_intr();
                        }
                    }
                });
            }
        });

        let total: u64 = (0..10)
            .map(|n| {
                let mut counter = [0u8; 8];
                counter.copy_from_slice(&disk.peek(DEV, n)[..8]);
                u64::from_le_bytes(counter)
            })
            .sum();
        assert_eq!(total, (THREADS * ROUNDS) as u64);
        assert!((0..THREADS).all(|i| refcnt(&bcache, i) == 0));
        let listed: usize = bcache.buckets.iter().map(|b| b.lock().len).sum();
        assert_eq!(listed, THREADS);
    }
}
