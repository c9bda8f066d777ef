//! 提供物理地址包装

use core::convert::TryFrom;
use core::fmt;

use bit_field::BitField;

use crate::consts::{PGSHIFT, PGSIZE};
use crate::error::Error;

/// 地址类型通用接口
///
/// 定义地址共有的操作方法，包括页对齐调整、页号与页内偏移的提取等。
pub trait Addr {
    /// 获取内部地址值的不可变引用
    fn data_ref(&self) -> &usize;

    /// 获取内部地址值的可变引用
    fn data_mut(&mut self) -> &mut usize;

    /// 向上取整到页边界
    #[inline]
    fn pg_round_up(&mut self) {
        *self.data_mut() = pg_round_up(*self.data_ref())
    }

    /// 向下取整到页边界
    #[inline]
    fn pg_round_down(&mut self) {
        *self.data_mut() = pg_round_down(*self.data_ref())
    }

    /// 增加一页大小（PGSIZE）
    ///
    /// # 注意
    /// 不检查地址是否合法，调用者需确保操作后地址有效
    #[inline]
    fn add_page(&mut self) {
        *self.data_mut() += PGSIZE;
    }

    /// 获取地址的usize表示
    #[inline]
    fn as_usize(&self) -> usize {
        *self.data_ref()
    }

    /// 页号，即去掉页内偏移后的高位
    #[inline]
    fn page_num(&self) -> usize {
        self.data_ref().get_bits(PGSHIFT..usize::BIT_LENGTH)
    }

    /// 页内偏移
    #[inline]
    fn page_offset(&self) -> usize {
        self.data_ref().get_bits(0..PGSHIFT)
    }

    /// 是否按页对齐
    #[inline]
    fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

/// 物理地址。
///
/// 由分配器交出的物理地址总是按页对齐的，它同时也是页帧的身份。
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(usize);

impl Addr for PhysAddr {
    #[inline]
    fn data_ref(&self) -> &usize {
        &self.0
    }

    #[inline]
    fn data_mut(&mut self) -> &mut usize {
        &mut self.0
    }
}

impl PhysAddr {
    /// 从原始整数构造物理地址，不做对齐检查。
    ///
    /// 页帧以外的地址（例如内核映像的结束位置）也需要用它表示。
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl TryFrom<usize> for PhysAddr {
    type Error = Error;

    /// 仅接受按页对齐的地址。
    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr % PGSIZE != 0 {
            return Err(Error::Misaligned(addr));
        }
        Ok(PhysAddr(addr))
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[inline]
pub fn pg_round_up(address: usize) -> usize {
    (address + (PGSIZE - 1)) & !(PGSIZE - 1)
}

#[inline]
pub fn pg_round_down(address: usize) -> usize {
    address & !(PGSIZE - 1)
}
