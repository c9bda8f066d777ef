//! 设备驱动模块，包含块设备接口与内存盘

use crate::fs::BufData;

pub mod ramdisk;

pub use ramdisk::RamDisk;

/// 块设备。
///
/// 缓冲区缓存在持有缓冲块睡眠锁的情况下同步调用 `rw`：
/// 每次未命中的读取调用一次，每次显式写回调用一次。
pub trait BlockDevice: Send + Sync {
    /// 读取（`writing == false`）或写入（`writing == true`）设备 `dev` 上的块 `blockno`。
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool);
}
