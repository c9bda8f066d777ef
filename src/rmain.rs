//! 启动流程
//!
//! 主 hart 按顺序初始化各个子系统，得到一个拥有全部子系统的 `Kernel`；
//! 之后每个 hart 在自己的执行流上运行，共享同一个 `Kernel`。

use std::panic;
use std::sync::Arc;
use std::thread;

use crate::clock::Ticks;
use crate::driver::RamDisk;
use crate::error::{Error, Result};
use crate::fs::{Bcache, BcacheConfig};
use crate::mm::{Kmem, KmemConfig};
use crate::process::CpuManager;

/// 启动配置
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    pub kmem: KmemConfig,
    pub bcache: BcacheConfig,
    /// 内存盘每个设备的块数
    pub disk_blocks: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            kmem: KmemConfig::default(),
            bcache: BcacheConfig::default(),
            disk_blocks: 2000,
        }
    }
}

/// 启动完成的内核
pub struct Kernel {
    pub ticks: Arc<Ticks>,
    pub disk: Arc<RamDisk>,
    pub kmem: Kmem,
    pub bcache: Bcache,
    ncpu: usize,
}

impl Kernel {
    /// 在主 hart 上完成全局初始化。
    ///
    /// # 流程解释
    /// 1. 物理页分配器（按配置选择实现）；
    /// 2. 时钟；
    /// 3. 仿真磁盘；
    /// 4. 缓冲区缓存。
    ///
    /// # 可能的错误
    /// 任一配置不合法时返回对应的 `Error`，已初始化的部分随之丢弃。
    pub fn boot(config: &BootConfig) -> Result<Self> {
        if config.disk_blocks == 0 {
            return Err(Error::InvalidConfig("disk must have at least one block"));
        }
        log::info!("xv6-mm is booting");

        let kmem = Kmem::kinit(&config.kmem)?;
        let ticks = Arc::new(Ticks::new());
        let disk = Arc::new(RamDisk::new(config.disk_blocks));
        let bcache = Bcache::new(config.bcache, disk.clone(), ticks.clone())?;

        log::info!("boot: {} harts ready", config.kmem.ncpu);
        Ok(Self {
            ticks,
            disk,
            kmem,
            bcache,
            ncpu: config.kmem.ncpu,
        })
    }

    pub fn ncpu(&self) -> usize {
        self.ncpu
    }

    /// 在每个 hart 上各运行一次 `f`，按 hart 编号返回结果。
    ///
    /// 每个 hart 是一个独立的执行流，开始时绑定到对应编号。
    /// 任一 hart panic 时，在全部 hart 结束后把该 panic 传回调用者。
    pub fn harts<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(usize, &Kernel) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|s| {
            let handles: Vec<_> = (0..self.ncpu)
                .map(|hart| {
                    s.spawn(move || {
                        CpuManager::bind(hart);
                        f(hart, self)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|err| panic::resume_unwind(err)))
                .collect()
        })
    }
}
