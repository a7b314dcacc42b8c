//! CPU 核心接口
//!
//! MMU 不模拟指令，只把映射变化转告给 CPU 核心。

use core::ptr::NonNull;

use crate::address::VmAddress;
use crate::asid::Asid;
use crate::page_table::Prot;

/// 客户机 CPU 核心
///
/// 由 CPU 模拟后端实现。MMU 在当前视图中的映射发生变化时调用这些方法，
/// 使后端的快速访存路径与页表保持一致。
pub trait CpuCore: Send + Sync {
    /// 让 CPU 直接访问 `[addr, addr + size)`，其后备内存为 `host`
    ///
    /// 返回 `false` 表示后端拒绝，MMU 会放弃本次映射。
    fn map_backing_mem(&self, addr: VmAddress, size: usize, host: NonNull<u8>, prot: Prot)
    -> bool;

    /// 撤销 `[addr, addr + size)` 的直接访问
    fn unmap_memory(&self, addr: VmAddress, size: usize) -> bool;

    /// 当前地址空间已切换为 `asid`
    fn on_addr_space_switch(&self, asid: Asid);
}

#[cfg(test)]
mod test_mock {
    extern crate test_support;

    use super::*;
    use test_support::mock::cpu::MockCpu;

    impl CpuCore for MockCpu {
        fn map_backing_mem(
            &self,
            addr: VmAddress,
            size: usize,
            host: NonNull<u8>,
            prot: Prot,
        ) -> bool {
            MockCpu::map_backing_mem(self, addr, size, host.as_ptr(), prot.bits())
        }

        fn unmap_memory(&self, addr: VmAddress, size: usize) -> bool {
            MockCpu::unmap_memory(self, addr, size)
        }

        fn on_addr_space_switch(&self, asid: Asid) {
            MockCpu::on_addr_space_switch(self, asid.raw())
        }
    }
}
