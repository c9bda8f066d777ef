//! 处理器状态管理，用于确定当前执行流所在的 hart 以及控制中断开关
//!
//! 宿主环境中每个线程就是一个执行流：它绑定在某个 hart 上，
//! 并拥有自己的中断使能位与 `push_off` 嵌套深度。

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 下一个可分配的执行流标识，0 保留为“无持有者”
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CPU: Cpu = Cpu::new();
}

/// 当前执行流的处理器视图。
///
/// # 字段说明
/// - `id`: 执行流当前所在的 hart；
/// - `token`: 执行流的唯一标识，用作锁持有者；
/// - `noff`: `push_off` 的嵌套深度；
/// - `intena`: 第一次 `push_off` 之前中断是否开启；
/// - `intr`: 模拟的中断使能位（sstatus.SIE）。
struct Cpu {
    id: Cell<usize>,
    token: usize,
    noff: Cell<u8>,
    intena: Cell<bool>,
    intr: Cell<bool>,
}

impl Cpu {
    fn new() -> Self {
        Self {
            id: Cell::new(0),
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            noff: Cell::new(0),
            intena: Cell::new(false),
            intr: Cell::new(true),
        }
    }
}

/// hart 身份查询与迁移。
pub struct CpuManager;

impl CpuManager {
    /// 返回当前执行流所在的 hart 编号。
    ///
    /// 只有在中断关闭（`push_off`）期间该值才是稳定的，
    /// 否则执行流随时可能被迁移到其他 hart 上。
    #[inline]
    pub fn cpu_id() -> usize {
        CPU.with(|c| c.id.get())
    }

    /// 将当前执行流迁移到 `hart` 上运行。
    ///
    /// # 功能说明
    /// 模拟调度器把执行流切换到另一个处理器上。
    ///
    /// # 可能的错误
    /// 中断处于关闭状态时迁移会破坏依赖 hart 身份的临界区，直接 panic。
    pub fn bind(hart: usize) {
        CPU.with(|c| {
            if c.noff.get() != 0 {
                panic!("bind(): hart {} -> {} with interrupts off", c.id.get(), hart);
            }
            c.id.set(hart);
        });
    }

    /// 当前执行流的唯一标识（非零）。
    #[inline]
    pub fn token() -> usize {
        CPU.with(|c| c.token)
    }

    /// 当前 `push_off` 的嵌套深度。
    pub fn noff() -> u8 {
        CPU.with(|c| c.noff.get())
    }
}

/// 读取模拟的中断使能位。
#[inline]
pub fn intr_get() -> bool {
    CPU.with(|c| c.intr.get())
}

/// 关闭中断并增加嵌套计数。
///
/// `push_off`/`pop_off` 与 `intr_off`/`intr_on` 类似，但可以嵌套：
/// 两次 `push_off` 需要两次 `pop_off` 才能恢复。
/// 若第一次 `push_off` 之前中断就是关闭的，则配对的 `pop_off` 之后中断仍保持关闭。
pub fn push_off() {
    CPU.with(|c| {
        let old = c.intr.get();
        c.intr.set(false);
        if c.noff.get() == 0 {
            c.intena.set(old);
        }
        c.noff.set(c.noff.get() + 1);
    });
}

/// 减少嵌套计数，计数归零时恢复第一次 `push_off` 之前的中断状态。
pub fn pop_off() {
    CPU.with(|c| {
        if c.intr.get() {
            panic!("pop_off(): interruptable");
        }
        let noff = match c.noff.get().checked_sub(1) {
            Some(noff) => noff,
            None => panic!("pop_off(): count not match"),
        };
        c.noff.set(noff);
        if noff == 0 && c.intena.get() {
            c.intr.set(true);
        }
    });
}
