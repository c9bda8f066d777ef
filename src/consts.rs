//! 平台常量

/// 磁盘块大小（字节）
pub const BSIZE: usize = 1024;

/// 单个文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;

/// 缓冲区缓存中的缓冲块数量
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// 缓冲区缓存的哈希桶数量，取质数以减少冲突
pub const NBUCKET: usize = 13;

/// 保留的设备号，标记尚未分配给任何磁盘块的缓冲槽
pub const NODEV: u32 = u32::MAX;

/// 最大 CPU（hart）数量
pub const NCPU: usize = 8;

/// 页大小（字节）
pub const PGSIZE: usize = 4096;

/// 页内偏移的位数
pub const PGSHIFT: usize = 12;

/// 内核物理内存的起始地址（QEMU virt 机器）
pub const KERNBASE: usize = 0x8000_0000;

/// 可管理物理内存的结束地址
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

/// 释放页时填充的垃圾字节，用于捕获悬垂引用
pub const JUNK_FREE: u8 = 1;

/// 分配页时填充的垃圾字节，用于捕获未初始化的读取
pub const JUNK_ALLOC: u8 = 5;
