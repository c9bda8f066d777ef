//! xv6 内核的内存管理核心：分片的缓冲区缓存与物理页分配器。
//!
//! - [`fs::bio`]：按块号散列到多个桶的缓冲区缓存，全局 LRU 置换；
//! - [`mm::kalloc`]：每 hart 空闲链表（带窃取）与写时复制引用计数两种页分配器；
//! - [`spinlock`] / [`sleeplock`] / [`process`]：锁与 hart 状态；
//! - [`rmain`]：启动流程，得到拥有全部子系统的 [`Kernel`]。

#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

pub mod clock;
pub mod consts;
pub mod driver;
pub mod error;
pub mod fs;
pub mod mm;
pub mod process;
pub mod rmain;
pub mod sleeplock;
pub mod spinlock;

pub use error::{Error, Result};
pub use rmain::{BootConfig, Kernel};
