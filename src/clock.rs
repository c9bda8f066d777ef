//! 时钟滴答
//!
//! 定时器中断每次到来时滴答数加一，缓冲区缓存用它记录缓冲块最后一次被释放的时间。

use core::num::Wrapping;

use crate::spinlock::SpinLock;

/// 单调递增的时间源。
pub trait Clock: Send + Sync {
    /// 读取当前滴答数。
    fn ticks(&self) -> u64;
}

/// 由定时器中断推进的滴答计数器。
pub struct Ticks(SpinLock<Wrapping<u64>>);

impl Ticks {
    pub const fn new() -> Self {
        Self(SpinLock::new(Wrapping(0), "time"))
    }

    /// 定时器中断处理：滴答数加一，返回新的滴答数。
    pub fn clock_intr(&self) -> u64 {
        let mut guard = self.0.lock();
        *guard += Wrapping(1);
        guard.0
    }

    pub fn clock_read(&self) -> u64 {
        self.0.lock().0
    }
}

impl Default for Ticks {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Ticks {
    fn ticks(&self) -> u64 {
        self.clock_read()
    }
}
