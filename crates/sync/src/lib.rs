//! 同步原语
//!
//! 向其它模块提供基本的锁原语，包括自旋锁和读写锁。
//!
//! 锁的外壳由 `lock_api` 提供，本 crate 只实现底层的原子状态机
//! （[`RawSpinLock`] 与 [`RawRwSpinLock`]），因此既可用于 `no_std` 环境，
//! 也可以直接在宿主机上运行单元测试。

#![no_std]

mod raw_spin_lock;
mod rwlock;
mod spin_lock;

pub use raw_spin_lock::*;
pub use rwlock::*;
pub use spin_lock::*;
