//! CPU 核心的 Mock 实现
//!
//! 注意：这里不直接依赖 `mem` crate（避免循环依赖）。
//! `mem` crate 在 `cfg(test)` 下为 [`MockCpu`] 实现 `CpuCore` trait，
//! 参数在那里转换为这里使用的基本类型。

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// 尚未发生地址空间切换时 `last_asid` 的取值
pub const NO_ASID: u32 = u32::MAX;

/// Mock 的 CPU 核心
///
/// 只记录 MMU 对它的调用次数与映射字节数，不保存任何客户机内存。
pub struct MockCpu {
    map_calls: AtomicUsize,
    unmap_calls: AtomicUsize,
    switch_calls: AtomicUsize,
    mapped_bytes: AtomicUsize,
    last_asid: AtomicU32,
    reject_next_map: AtomicBool,
}

impl MockCpu {
    pub const fn new() -> Self {
        Self {
            map_calls: AtomicUsize::new(0),
            unmap_calls: AtomicUsize::new(0),
            switch_calls: AtomicUsize::new(0),
            mapped_bytes: AtomicUsize::new(0),
            last_asid: AtomicU32::new(NO_ASID),
            reject_next_map: AtomicBool::new(false),
        }
    }

    /// 记录一次映射；如果设置了 [`MockCpu::reject_next_map`] 则拒绝（仅一次）
    pub fn map_backing_mem(&self, _addr: u32, size: usize, _host: *mut u8, _prot: u32) -> bool {
        if self.reject_next_map.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.map_calls.fetch_add(1, Ordering::Relaxed);
        self.mapped_bytes.fetch_add(size, Ordering::Relaxed);
        true
    }

    /// 记录一次解除映射
    pub fn unmap_memory(&self, _addr: u32, size: usize) -> bool {
        self.unmap_calls.fetch_add(1, Ordering::Relaxed);
        self.mapped_bytes.fetch_sub(size, Ordering::Relaxed);
        true
    }

    /// 记录一次地址空间切换
    pub fn on_addr_space_switch(&self, asid: u16) {
        self.switch_calls.fetch_add(1, Ordering::Relaxed);
        self.last_asid.store(asid as u32, Ordering::Relaxed);
    }

    /// 让下一次 `map_backing_mem` 失败
    pub fn reject_next_map(&self) {
        self.reject_next_map.store(true, Ordering::Release);
    }

    pub fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::Relaxed)
    }

    pub fn unmap_calls(&self) -> usize {
        self.unmap_calls.load(Ordering::Relaxed)
    }

    pub fn switch_calls(&self) -> usize {
        self.switch_calls.load(Ordering::Relaxed)
    }

    /// 当前仍映射在 CPU 上的字节数
    pub fn mapped_bytes(&self) -> usize {
        self.mapped_bytes.load(Ordering::Relaxed)
    }

    /// 最近一次切换到的 ASID；从未切换时为 [`NO_ASID`]
    pub fn last_asid(&self) -> u32 {
        self.last_asid.load(Ordering::Relaxed)
    }
}

impl Default for MockCpu {
    fn default() -> Self {
        Self::new()
    }
}
