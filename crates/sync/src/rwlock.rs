//! 读写自旋锁
//!
//! 允许多个读者并发进入，写者独占。读路径只做一次原子加法，
//! 适合“读多写少”的场景（例如地址翻译）。
//!
//! 阻塞等待的写者会挂上等待标志，此后新的读者不再进入，
//! 因此持续不断的读者不会把写者饿死。

use core::{
    hint,
    sync::atomic::{AtomicUsize, Ordering},
};

/// 写者持有标志（最低位）
const WRITER: usize = 1;
/// 写者等待标志
const PENDING: usize = 2;
/// 每个读者占用的计数单位
const READER: usize = 4;

/// 原始读写自旋锁
///
/// 状态字最低位表示写者，次低位表示有写者在等待，其余位为读者计数。
#[derive(Debug)]
pub struct RawRwSpinLock {
    state: AtomicUsize,
}

impl RawRwSpinLock {
    /// 创建一个未加锁的读写锁
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// 当前读者数量 (仅用于调试/测试)
    pub fn reader_count(&self) -> usize {
        self.state.load(Ordering::Relaxed) / READER
    }

    /// 是否有写者在等待 (仅用于调试/测试)
    pub fn is_write_pending(&self) -> bool {
        self.state.load(Ordering::Relaxed) & PENDING != 0
    }
}

impl Default for RawRwSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: 写者只能在没有读者和写者时进入；读者只能在写者位与等待位都清零时进入。
unsafe impl lock_api::RawRwLock for RawRwSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawRwSpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    fn lock_shared(&self) {
        while !self.try_lock_shared() {
            hint::spin_loop();
        }
    }

    fn try_lock_shared(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        while state & (WRITER | PENDING) == 0 {
            match self.state.compare_exchange_weak(
                state,
                state + READER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
        false
    }

    unsafe fn unlock_shared(&self) {
        self.state.fetch_sub(READER, Ordering::Release);
    }

    fn lock_exclusive(&self) {
        while !self.try_lock_exclusive() {
            // 拿到锁时等待位随之清除，其余仍在等待的写者会重新挂上
            if self.state.load(Ordering::Relaxed) & PENDING == 0 {
                self.state.fetch_or(PENDING, Ordering::Relaxed);
            }
            hint::spin_loop();
        }
    }

    fn try_lock_exclusive(&self) -> bool {
        let state = self.state.load(Ordering::Relaxed);
        state & !PENDING == 0
            && self
                .state
                .compare_exchange(state, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    unsafe fn unlock_exclusive(&self) {
        self.state.fetch_and(!WRITER, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & !PENDING != 0
    }

    fn is_locked_exclusive(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }
}

/// 读写锁
pub type RwLock<T> = lock_api::RwLock<RawRwSpinLock, T>;
/// 读锁保护器
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwSpinLock, T>;
/// 写锁保护器
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwSpinLock, T>;
