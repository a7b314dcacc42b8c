//! 客户机地址与页码抽象
//!
//! 客户机地址是 32 位无符号整数，本身不携带页大小；页码的换算依赖 MMU 的
//! [`AddressLayout`]，因此这里的转换函数都显式接收布局参数。

use crate::config::AddressLayout;

/// 客户机虚拟地址
pub type VmAddress = u32;

/// [Vpn] (Virtual Page Number)
/// ---------------------
/// 客户机虚拟页码。
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Vpn(pub u32);

impl Vpn {
    /// 将地址转换为页码 (向下取整)。
    pub fn from_addr_floor(addr: VmAddress, layout: &AddressLayout) -> Self {
        Self(addr >> layout.page_index_shift())
    }

    /// 获取该页码对应的起始地址。
    pub fn start_addr(self, layout: &AddressLayout) -> VmAddress {
        self.0 << layout.page_index_shift()
    }

    /// 下一个页码
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// [VpnRange]
/// ---------------------
/// 页码范围，半开区间 `[start, end)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VpnRange {
    /// 范围的起始页码 (包含)。
    pub start: Vpn,
    /// 范围的结束页码 (不包含)。
    pub end: Vpn,
}

impl VpnRange {
    /// 创建一个新的页码范围。
    pub fn new(start: Vpn, end: Vpn) -> Self {
        Self { start, end }
    }

    /// 覆盖 `[addr, addr + size)` 的页码范围，地址与长度需已按页对齐。
    pub fn from_addr_size(addr: VmAddress, size: usize, layout: &AddressLayout) -> Self {
        let start = Vpn::from_addr_floor(addr, layout);
        let pages = (size >> layout.page_index_shift()) as u32;
        Self::new(start, Vpn(start.0 + pages))
    }

    /// 获取范围内的页数。
    pub fn len(&self) -> usize {
        debug_assert!(self.end >= self.start);
        (self.end.0 - self.start.0) as usize
    }

    /// 检查范围是否为空 (即 start == end)。
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 检查范围是否包含给定的页码。
    pub fn contains(&self, vpn: Vpn) -> bool {
        vpn >= self.start && vpn < self.end
    }

    /// 检查范围是否包含另一个范围。
    pub fn contains_range(&self, other: &Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// 检查两个范围是否重叠。
    ///
    /// 注意: 相邻的范围不视为重叠。
    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// 获取范围的迭代器。
    pub fn iter(&self) -> VpnRangeIterator {
        VpnRangeIterator {
            current: self.start,
            end: self.end,
        }
    }
}

impl IntoIterator for VpnRange {
    type Item = Vpn;
    type IntoIter = VpnRangeIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// [`VpnRange`] 的迭代器
#[derive(Clone, Debug)]
pub struct VpnRangeIterator {
    current: Vpn,
    end: Vpn,
}

impl Iterator for VpnRangeIterator {
    type Item = Vpn;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current < self.end {
            let vpn = self.current;
            self.current = vpn.next();
            Some(vpn)
        } else {
            None
        }
    }
}
