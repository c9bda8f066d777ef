//! 可恢复错误
//!
//! 只有调用者能够处理的情况才会以 `Error` 返回。
//! 缓冲区耗尽、锁纪律被破坏、非法的 `kfree` 等不可恢复的情况直接 `panic!`。

use thiserror::Error;

/// 内存管理核心的可恢复错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// 物理页已耗尽
    #[error("out of physical memory")]
    OutOfMemory,

    /// 配置参数不合法
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// 物理内存区间中容纳不下一个完整的页
    #[error("physical range [{start:#x}, {end:#x}) holds no whole page")]
    InvalidRange { start: usize, end: usize },

    /// 地址未按页对齐
    #[error("address {0:#x} is not page aligned")]
    Misaligned(usize),
}

pub type Result<T> = core::result::Result<T, Error>;
