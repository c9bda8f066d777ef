//! 内存管理模块

pub use addr::{pg_round_down, pg_round_up, Addr, PhysAddr};
pub use kalloc::{CowKmem, KallocKind, Kmem, KmemConfig, PageAllocator, PerCpuKmem};
pub use phys::{PhysMemory, RawSinglePage};

pub mod addr;
pub mod kalloc;
pub mod list;
pub mod phys;
