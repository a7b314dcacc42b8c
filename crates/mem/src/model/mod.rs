//! 内存模型
//!
//! 两代地址空间 / 页目录管理方式实现同一个 [`MemoryModel`] 接口，
//! 在 MMU 构造时选定，此后不可更改：
//!
//! - [`MultipleModel`]: 每个地址空间一个页目录，另有一个对所有空间可见的全局页目录
//! - [`MovingModel`]: 只有一个页目录，run region 内的页表在切换时被“搬入/搬出”
//!
//! MMU 本身与模型无关，只通过 trait 对象分发。
//!
//! 两种模型都保证同一视图中一个槽位只对应一张页表：本地页表不会遮住全局页表，
//! 反之亦然。因此一条宿主映射在某个视图中是否可见，只取决于它所在的页表是否放在该视图中。

mod moving;
mod multiple;

pub use moving::{MOVING_MAX_ADDR_SPACES, MovingModel};
pub use multiple::{MULTIPLE_MAX_ADDR_SPACES, MultipleModel};

use alloc::vec;
use alloc::vec::Vec;

use crate::address::VmAddress;
use crate::asid::{Asid, AsidRegistry};
use crate::error::{MmuError, MmuResult};
use crate::page_table::{AssignFlags, PageTableId};

/// 内存模型类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemModelType {
    /// 旧模型：单页目录，进程数据在切换时搬移
    Moving,
    /// 新模型：每个地址空间独立页目录
    Multiple,
}

/// 页表的可见范围
///
/// 宿主映射按可见范围记账：全局映射对所有地址空间可见，
/// 本地映射只属于一个地址空间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapScope {
    /// 所有地址空间共享
    Global,
    /// 只属于某个地址空间
    Local(Asid),
}

/// 内存模型接口
pub trait MemoryModel: Send + Sync {
    /// 模型类型
    fn model_type(&self) -> MemModelType;

    /// 地址空间登记表
    fn registry(&self) -> &AsidRegistry;

    /// 地址空间登记表（可写）
    fn registry_mut(&mut self) -> &mut AsidRegistry;

    /// 创建或复用一个地址空间；表满且策略不允许复用时返回 `None`
    fn rollover_fresh_addr_space(&mut self) -> Option<Asid>;

    /// 切换当前地址空间；未知 ASID 返回 `false` 且不改变状态
    fn set_current_addr_space(&mut self, asid: Asid) -> bool;

    /// 当前地址空间
    fn current_addr_space(&self) -> Option<Asid> {
        self.registry().current()
    }

    /// 把页表放到 `linear_addr` 处
    ///
    /// `targets` 为 `None`（或空）时作用于当前地址空间。
    /// 所有目标都先校验，失败时不做任何修改。
    /// `in_use` 表示页表已有映射：这样的页表只能重复已有的放置，不能出现在新的位置。
    /// 每新放入一个地址空间，该空间的 pin 计数加一。
    fn assign_page_table(
        &mut self,
        table: PageTableId,
        linear_addr: VmAddress,
        flags: AssignFlags,
        targets: Option<&[Asid]>,
        in_use: bool,
    ) -> MmuResult<()>;

    /// 在 `view` 视图中查找覆盖 `addr` 的页表
    ///
    /// `view` 为 `None` 时只能看到全局页表；未知的 ASID 一律查不到。
    fn lookup(&self, view: Option<Asid>, addr: VmAddress) -> Option<(PageTableId, MapScope)>;

    /// 页表放在 `linear_addr` 处的所有位置
    ///
    /// 全局放置为 `[Global]`，本地放置按 ASID 升序列出各个地址空间，未放置为空。
    fn placements(&self, table: PageTableId, linear_addr: VmAddress) -> Vec<MapScope>;

    /// 从所有页目录中摘除页表，并解除对应地址空间的 pin
    fn detach_page_table(&mut self, table: PageTableId);

    /// 释放地址空间及其本地页目录
    fn free_addr_space(&mut self, asid: Asid) -> MmuResult<()>;
}

/// 页目录：槽位到页表 ID 的映射
#[derive(Debug, Clone)]
pub(crate) struct PageDirectory {
    slots: Vec<Option<PageTableId>>,
}

impl PageDirectory {
    pub(crate) fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![None; slot_count],
        }
    }

    #[inline]
    pub(crate) fn get(&self, slot: usize) -> Option<PageTableId> {
        self.slots.get(slot).copied().flatten()
    }

    /// 槽位为空或已经是同一张页表
    pub(crate) fn can_place(&self, slot: usize, table: PageTableId) -> bool {
        matches!(self.slots.get(slot), Some(None)) || self.get(slot) == Some(table)
    }

    pub(crate) fn place(&mut self, slot: usize, table: PageTableId) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(table);
        }
    }

    pub(crate) fn clear(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
    }

    /// 摘除页表，返回被清空的槽位数
    pub(crate) fn detach(&mut self, table: PageTableId) -> usize {
        let mut cleared = 0;
        for entry in self.slots.iter_mut().filter(|e| **e == Some(table)) {
            *entry = None;
            cleared += 1;
        }
        cleared
    }
}

/// 解析 assign 的目标列表：未给出时使用当前地址空间
fn resolve_targets<'t>(
    targets: Option<&'t [Asid]>,
    current: &'t Option<Asid>,
) -> MmuResult<&'t [Asid]> {
    match targets {
        Some(list) if !list.is_empty() => Ok(list),
        _ => current
            .as_ref()
            .map(core::slice::from_ref)
            .ok_or(MmuError::NoAddressSpace),
    }
}
