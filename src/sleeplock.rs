//! 睡眠锁模块
//! 提供基于休眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的执行流会进入休眠状态，避免忙等待。
//! 休眠与唤醒由条件变量完成，锁同时记录持有者，供 `holding` 检查锁纪律。

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::process::CpuManager;

/// 睡眠锁。
///
/// # 字段说明
/// - `owner`: 持有者标识，`None` 表示空闲；由内部互斥量保护；
/// - `wakeup`: 等待锁释放的条件变量；
/// - `name`: 锁的名称，用于调试；
/// - `data`: 被保护的数据。
pub struct SleepLock<T: ?Sized> {
    owner: Mutex<Option<usize>>,
    wakeup: Condvar,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            owner: Mutex::new(None),
            wakeup: Condvar::new(),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// 获取睡眠锁，锁被占用时休眠等待。
    ///
    /// # 功能说明
    /// 1. 获取内部互斥量（保护持有者状态）；
    /// 2. 锁已被占用时在条件变量上休眠，被唤醒后重新检查；
    /// 3. 记录当前执行流为持有者并返回守卫。
    ///
    /// # 可能的错误
    /// 当前执行流已经持有该锁时直接 panic，否则它将永远等待自己。
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = CpuManager::token();
        let mut owner = self.state();
        if *owner == Some(me) {
            panic!("sleeplock {} acquire", self.name);
        }
        while owner.is_some() {
            owner = self
                .wakeup
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        drop(owner);

        SleepLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 判断当前执行流是否持有该锁。
    pub fn holding(&self) -> bool {
        *self.state() == Some(CpuManager::token())
    }

    /// 锁是否被任意执行流持有。
    pub fn is_locked(&self) -> bool {
        self.state().is_some()
    }

    fn unlock(&self) {
        let mut owner = self.state();
        *owner = None;
        self.wakeup.notify_all();
        drop(owner);
    }

    // 持有者状态只有一个 Option，不会因 panic 而处于中间状态
    fn state(&self) -> MutexGuard<'_, Option<usize>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 睡眠锁守卫。
///
/// 守卫可以随缓冲块一起移交给其他执行流，但持有者记录不会随之改变：
/// 此时 `holding` 在接收方返回 `false`，用于发现越权的写回与释放。
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> SleepLockGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn waiter_sleeps_until_release() {
        let lock = Arc::new(SleepLock::new(0u32, "test"));
        let released = Arc::new(AtomicBool::new(false));

        let mut guard = lock.lock();
        assert!(guard.holding());

        let waiter = {
            let lock = Arc::clone(&lock);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let guard = lock.lock();
                assert!(released.load(Ordering::SeqCst));
                *guard
            })
        };

        thread::sleep(Duration::from_millis(20));
        *guard = 7;
        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert_eq!(waiter.join().unwrap(), 7);
        assert!(!lock.is_locked());
    }

    #[test]
    fn holding_is_per_owner() {
        let lock = Arc::new(SleepLock::new((), "owner"));
        let guard = lock.lock();
        let other = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.holding()).join().unwrap()
        };
        assert!(lock.holding());
        assert!(!other);
        drop(guard);
        assert!(!lock.holding());
    }

    #[test]
    #[should_panic(expected = "sleeplock twice acquire")]
    fn reacquire_panics() {
        let lock = SleepLock::new((), "twice");
        let _a = lock.lock();
        let _b = lock.lock();
    }
}
