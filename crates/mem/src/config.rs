//! 模拟器配置与地址运算常量
//!
//! - [`EmulatorConfig`]: 进程级模拟器配置（由调用方持有，MMU 只借用）
//! - [`AddressLayout`]: 由页大小位数一次性推导出的地址运算常量
//! - [`MemoryMap`]: 新旧两代客户机内存布局

use core::ops::Range;

use crate::address::VmAddress;
use crate::error::{MmuError, MmuResult};

/// 地址空间表满时 rollover 的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RolloverPolicy {
    /// 直接失败，返回无效 ASID
    #[default]
    Fail,
    /// 回收最久未使用、且既非当前空间又没有宿主映射的地址空间
    EvictLeastRecentlyUsed,
}

/// 模拟器配置中与 MMU 相关的部分
#[derive(Debug, Clone, Default)]
pub struct EmulatorConfig {
    /// 记录每次客户机读访问
    pub log_read: bool,
    /// 记录每次客户机写访问
    pub log_write: bool,
    /// 地址空间耗尽时的策略
    pub rollover_policy: RolloverPolicy,
}

/// 由页大小位数推导出的地址运算常量
///
/// 只能通过 [`AddressLayout::from_page_size_bits`] 构造，构造后不可变，
/// 因此各常量之间始终一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    page_size_bits: u32,
    offset_mask: u32,
    page_index_mask: u32,
    page_index_shift: u32,
    page_table_index_shift: u32,
    chunk_shift: u32,
    chunk_size: u32,
    chunk_mask: u32,
    page_per_tab_shift: u32,
}

impl AddressLayout {
    /// 根据页大小位数计算全部常量
    ///
    /// 只接受 12（4 KiB 页）和 20（1 MiB 页），其余值返回
    /// [`MmuError::InvalidPageSize`]。
    pub fn from_page_size_bits(bits: usize) -> MmuResult<Self> {
        // 每张页表覆盖的页数：4 KiB 页 256 项（1 MiB），1 MiB 页 16 项（16 MiB）
        let page_per_tab_shift = match bits {
            12 => 8,
            20 => 4,
            _ => return Err(MmuError::InvalidPageSize(bits)),
        };
        let page_size_bits = bits as u32;
        let offset_mask = (1u32 << page_size_bits) - 1;
        let page_table_index_shift = page_size_bits + page_per_tab_shift;
        let chunk_shift = page_table_index_shift;
        let chunk_size = 1u32 << chunk_shift;

        Ok(Self {
            page_size_bits,
            offset_mask,
            page_index_mask: !offset_mask,
            page_index_shift: page_size_bits,
            page_table_index_shift,
            chunk_shift,
            chunk_size,
            chunk_mask: chunk_size - 1,
            page_per_tab_shift,
        })
    }

    /// 页大小位数
    pub fn page_size_bits(&self) -> u32 {
        self.page_size_bits
    }

    /// 页大小（字节）
    pub fn page_size(&self) -> usize {
        1 << self.page_size_bits
    }

    /// 页内偏移掩码
    pub fn offset_mask(&self) -> u32 {
        self.offset_mask
    }

    /// 页号掩码（偏移之上的全部位）
    pub fn page_index_mask(&self) -> u32 {
        self.page_index_mask
    }

    /// 页号移位
    pub fn page_index_shift(&self) -> u32 {
        self.page_index_shift
    }

    /// 页目录索引移位
    pub fn page_table_index_shift(&self) -> u32 {
        self.page_table_index_shift
    }

    /// chunk 粒度移位
    pub fn chunk_shift(&self) -> u32 {
        self.chunk_shift
    }

    /// chunk 粒度（字节）
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// chunk 内偏移掩码
    pub fn chunk_mask(&self) -> u32 {
        self.chunk_mask
    }

    /// 每张页表表项数的移位
    pub fn page_per_tab_shift(&self) -> u32 {
        self.page_per_tab_shift
    }

    /// 每张页表的表项数
    pub fn entries_per_table(&self) -> usize {
        1 << self.page_per_tab_shift
    }

    /// 一张页表覆盖的地址范围（字节）
    pub fn table_span(&self) -> usize {
        1 << self.page_table_index_shift
    }

    /// 一个页目录的槽位数
    pub fn directory_slots(&self) -> usize {
        1 << (32 - self.page_table_index_shift)
    }

    /// 地址所在的页目录槽位
    #[inline]
    pub fn directory_slot(&self, addr: VmAddress) -> usize {
        (addr >> self.page_table_index_shift) as usize
    }

    /// 地址在其页表内的表项下标
    #[inline]
    pub fn table_entry_index(&self, addr: VmAddress) -> usize {
        ((addr >> self.page_index_shift) as usize) & (self.entries_per_table() - 1)
    }

    /// 页内偏移
    #[inline]
    pub fn page_offset(&self, addr: VmAddress) -> usize {
        (addr & self.offset_mask) as usize
    }

    /// 数值是否按页对齐
    #[inline]
    pub fn is_page_aligned(&self, value: usize) -> bool {
        value & (self.offset_mask as usize) == 0
    }

    /// 地址是否按页表覆盖范围对齐
    #[inline]
    pub fn is_table_aligned(&self, addr: VmAddress) -> bool {
        (addr as usize) & (self.table_span() - 1) == 0
    }

    /// 向上对齐到页边界
    pub fn page_align_up(&self, value: usize) -> usize {
        let mask = self.offset_mask as usize;
        (value + mask) & !mask
    }
}

/// 客户机内存布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    /// 每个地址空间私有的区域（旧布局下即 run region）
    pub local: Range<VmAddress>,
    /// 共享数据区
    pub shared: Range<VmAddress>,
    /// ROM 映像区
    pub rom: Range<VmAddress>,
    /// 内核区起始地址
    pub kernel_start: VmAddress,
}

impl MemoryMap {
    /// 新布局（多地址空间模型使用的内存图）
    pub const fn modern() -> Self {
        Self {
            local: 0x0000_0000..0x3800_0000,
            shared: 0x4000_0000..0x8000_0000,
            rom: 0x8000_0000..0xC000_0000,
            kernel_start: 0xC000_0000,
        }
    }

    /// 旧布局
    pub const fn legacy() -> Self {
        Self {
            local: 0x0000_0000..0x4000_0000,
            rom: 0x5000_0000..0x5800_0000,
            shared: 0x8000_0000..0xC000_0000,
            kernel_start: 0xC000_0000,
        }
    }

    /// 按 `mem_map_old` 选择布局
    pub const fn for_generation(mem_map_old: bool) -> Self {
        if mem_map_old {
            Self::legacy()
        } else {
            Self::modern()
        }
    }

    /// 地址是否位于本地区域
    #[inline]
    pub fn is_local(&self, addr: VmAddress) -> bool {
        self.local.contains(&addr)
    }
}
