//! 客户机 MMU 模拟
//!
//! 在软件中重现客户机 ARM 核心所依赖的地址翻译与页表行为：
//! 虚拟地址到宿主机指针的翻译、页表的分配与安装、地址空间 (ASID) 的生命周期，
//! 以及 4 KiB / 1 MiB 两种页大小与新旧两代内存布局所需的地址运算。
//!
//! # 组成
//!
//! - [`PageTableAllocator`]: 页表池，以带代数的 ID 分发页表
//! - [`AsidRegistry`]: 地址空间登记表，负责 ASID 的分配、回收与 LRU 复用
//! - [`MemoryModel`]: 内存模型（[`MultipleModel`] / [`MovingModel`]），
//!   决定页表如何放入页目录以及如何切换地址空间
//! - [`Mmu`]: 对 CPU 核心与系统服务的唯一入口
//! - [`Chunk`] / [`ChunkAllocator`]: 通过 MMU 映射操作增长的已提交内存区域
//!
//! # 外部协作者
//!
//! CPU 核心通过 [`CpuCore`] trait 接入，页表池与配置由调用方持有，
//! MMU 只保存引用。

#![no_std]

extern crate alloc;

mod asid;
mod config;
mod cpu;
mod error;
mod mmu;

pub mod address;
pub mod chunk;
pub mod model;
pub mod page_table;

#[cfg(test)]
mod tests;

pub use address::{VmAddress, Vpn, VpnRange};
pub use asid::{Asid, AsidRegistry, Rollover};
pub use chunk::{Chunk, ChunkAllocator};
pub use config::{AddressLayout, EmulatorConfig, MemoryMap, RolloverPolicy};
pub use cpu::CpuCore;
pub use error::{MmuError, MmuResult};
pub use mmu::{Mmu, PAGE_SIZE_BYTES_12B, PAGE_SIZE_BYTES_20B};
pub use model::{MapScope, MemModelType, MemoryModel, MovingModel, MultipleModel};
pub use page_table::{
    AssignFlags, PageTable, PageTableAllocator, PageTableEntry, PageTableId, Prot,
};
