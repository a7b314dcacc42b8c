//! 页表模块
//!
//! 页表是一段定长的翻译表项，每一项把一个客户机页映射到宿主机内存（或标记为未映射）。
//! 新建的页表不属于任何页目录，只有经 MMU 分配（assign）后才参与翻译。
mod allocator;

pub use allocator::*;

use alloc::boxed::Box;
use alloc::vec;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::address::VmAddress;

bitflags! {
    /// 页保护位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Prot: u32 {
        /// 可读
        const READ = 1 << 0;
        /// 可写
        const WRITE = 1 << 1;
        /// 可执行
        const EXEC = 1 << 2;
        /// 读写
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// 读写执行
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

bitflags! {
    /// 页表分配（assign）标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AssignFlags: u32 {
        /// 允许本地放置落在本地区域之外（“本地+全局”区域）
        const LOCAL_GLOBAL_REGION = 1 << 0;
        /// 放入全局页目录，对所有地址空间可见（包括之后创建的）
        const GLOBAL = 1 << 1;
    }
}

/// 页表 ID
///
/// 低 16 位为池内下标，高 16 位为代数。页表被释放后槽位代数递增，
/// 因此旧 ID 再也查不到新页表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageTableId(u32);

impl PageTableId {
    pub(crate) fn new(index: u16, generation: u16) -> Self {
        Self(((generation as u32) << 16) | index as u32)
    }

    /// 从整数句柄恢复 ID（不保证有效）
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// 整数句柄
    pub fn raw(self) -> u32 {
        self.0
    }

    /// 池内下标
    pub fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    /// 代数
    pub fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// 页表项
///
/// 宿主机地址以整数保存（0 表示未映射），使页表可以在线程间共享。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    host: usize,
    prot: Prot,
}

impl PageTableEntry {
    /// 未映射的表项
    pub const UNMAPPED: Self = Self {
        host: 0,
        prot: Prot::empty(),
    };

    /// 映射到 `host` 的表项
    pub fn new(host: NonNull<u8>, prot: Prot) -> Self {
        Self {
            host: host.as_ptr() as usize,
            prot,
        }
    }

    /// 是否已映射
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.host != 0
    }

    /// 页起始处的宿主机指针
    #[inline]
    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.host as *mut u8)
    }

    /// 保护位
    #[inline]
    pub fn prot(&self) -> Prot {
        self.prot
    }
}

/// 页表
#[derive(Debug)]
pub struct PageTable {
    id: PageTableId,
    entries: Box<[PageTableEntry]>,
    linear_base: Option<VmAddress>,
}

impl PageTable {
    pub(crate) fn new(id: PageTableId, entry_count: usize) -> Self {
        Self {
            id,
            entries: vec![PageTableEntry::UNMAPPED; entry_count].into_boxed_slice(),
            linear_base: None,
        }
    }

    /// 页表 ID
    pub fn id(&self) -> PageTableId {
        self.id
    }

    /// 表项数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 页表是否没有表项
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 首次分配时确定的线性基址；未分配时为 `None`
    pub fn linear_base(&self) -> Option<VmAddress> {
        self.linear_base
    }

    pub(crate) fn set_linear_base(&mut self, base: VmAddress) {
        self.linear_base = Some(base);
    }

    /// 读取表项
    #[inline]
    pub fn entry(&self, index: usize) -> Option<&PageTableEntry> {
        self.entries.get(index)
    }

    pub(crate) fn set_entry(&mut self, index: usize, entry: PageTableEntry) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = entry;
        }
    }

    /// 已映射的表项数
    pub fn mapped_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_mapped()).count()
    }
}
