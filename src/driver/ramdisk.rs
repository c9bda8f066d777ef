//! 内存盘
//!
//! 每个设备号对应一组定长的块，未写过的块读出全零。
//! 可以配置每次访问的延迟，模拟 I/O 进行期间调用者持有缓冲块睡眠锁的情形。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::consts::BSIZE;
use crate::fs::BufData;
use crate::spinlock::SpinLock;
use super::BlockDevice;

pub struct RamDisk {
    nblocks: u32,
    latency: Option<Duration>,
    blocks: SpinLock<HashMap<(u32, u32), Box<[u8; BSIZE]>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    /// 创建一个每个设备有 `nblocks` 个块的内存盘。
    pub fn new(nblocks: u32) -> Self {
        Self {
            nblocks,
            latency: None,
            blocks: SpinLock::new(HashMap::new(), "ramdisk"),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// 每次访问前休眠 `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    /// 设备读取次数
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备写入次数
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过缓存直接读取块内容
    pub fn peek(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.check(dev, blockno);
        match self.blocks.lock().get(&(dev, blockno)) {
            Some(block) => **block,
            None => [0; BSIZE],
        }
    }

    /// 绕过缓存直接写入块内容，用于准备磁盘镜像
    pub fn poke(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.check(dev, blockno);
        self.blocks.lock().insert((dev, blockno), Box::new(*data));
    }

    fn check(&self, dev: u32, blockno: u32) {
        if blockno >= self.nblocks {
            panic!("ramdisk: dev {} block {} out of range ({} blocks)", dev, blockno, self.nblocks);
        }
    }
}

impl BlockDevice for RamDisk {
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool) {
        self.check(dev, blockno);
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let mut blocks = self.blocks.lock();
        if writing {
            blocks.insert((dev, blockno), Box::new(**data));
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            match blocks.get(&(dev, blockno)) {
                Some(block) => data.copy_from_slice(&block[..]),
                None => data.fill(0),
            }
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
    }
}
