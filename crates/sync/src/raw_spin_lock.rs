//! 自旋锁实现
//!
//! 基于原子操作实现自旋锁机制，并作为 `lock_api::RawMutex` 提供给上层。

use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 原始自旋锁，提供互斥访问临界区的能力。
///
/// 不可重入 (即不能在持有锁时再次调用 `lock`)。
/// 通常不直接使用，而是通过 [`SpinLock`](crate::SpinLock) 包装数据。
#[derive(Debug)]
pub struct RawSpinLock {
    lock: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个新的 RawSpinLock 实例。
    pub const fn new() -> Self {
        RawSpinLock {
            lock: AtomicBool::new(false),
        }
    }

    /// 检查锁是否被占用 (仅用于调试/测试)
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: 只有 compare_exchange 成功的一方能进入临界区，
// Acquire/Release 保证临界区内的读写不会越过加锁/解锁。
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 先只读等待，减少缓存行争用
            while self.lock.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        RawSpinLock::is_locked(self)
    }
}
