//! 文件系统模块
//!
//! 目前只包含缓冲区缓存；日志、inode 等上层都通过 `bread`/`bwrite`/`brelse` 访问磁盘块。

pub mod bio;

pub use bio::{Bcache, BcacheConfig, BcacheStats, Buf, BufData, BufFlags};
