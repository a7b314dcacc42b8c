//! 搬移模型（旧内存布局）
//!
//! 只有一个页目录。run region（旧布局的本地区域）内分配的页表登记为
//! 所属地址空间的“驻留页表”，切换地址空间时搬出旧空间的、搬入新空间的；
//! run region 之外是所有空间共享的部分，查找时忽略 ASID
//! （但未知的 ASID 仍然查不到）。

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use super::{MapScope, MemModelType, MemoryModel, PageDirectory, resolve_targets};
use crate::address::VmAddress;
use crate::asid::{Asid, AsidRegistry};
use crate::config::{AddressLayout, MemoryMap, RolloverPolicy};
use crate::error::{MmuError, MmuResult};
use crate::page_table::{AssignFlags, PageTableId};

/// 地址空间槽位数（含保留的 0 号）
pub const MOVING_MAX_ADDR_SPACES: usize = 32;

type Homes = BTreeMap<usize, PageTableId>;

/// 搬移模型
pub struct MovingModel {
    layout: AddressLayout,
    map: MemoryMap,
    registry: AsidRegistry,
    directory: PageDirectory,
    homes: Vec<Option<Homes>>,
}

impl MovingModel {
    /// 创建模型
    pub fn new(layout: AddressLayout, map: MemoryMap, policy: RolloverPolicy) -> Self {
        Self {
            layout,
            map,
            registry: AsidRegistry::new(MOVING_MAX_ADDR_SPACES, policy),
            directory: PageDirectory::new(layout.directory_slots()),
            homes: vec![None; MOVING_MAX_ADDR_SPACES],
        }
    }

    fn homes(&self, asid: Asid) -> Option<&Homes> {
        self.homes.get(asid.index())?.as_ref()
    }
}

impl MemoryModel for MovingModel {
    fn model_type(&self) -> MemModelType {
        MemModelType::Moving
    }

    fn registry(&self) -> &AsidRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut AsidRegistry {
        &mut self.registry
    }

    fn rollover_fresh_addr_space(&mut self) -> Option<Asid> {
        // 被复用的空间既不是当前空间也没有驻留页表
        let asid = self.registry.rollover()?.asid();
        self.homes[asid.index()] = Some(Homes::new());
        Some(asid)
    }

    fn set_current_addr_space(&mut self, asid: Asid) -> bool {
        if !self.registry.contains(asid) {
            return false;
        }
        let old = self.registry.current();
        if old != Some(asid) {
            if let Some(Some(old_homes)) = old.and_then(|old| self.homes.get(old.index())) {
                for &slot in old_homes.keys() {
                    self.directory.clear(slot);
                }
            }
            if let Some(Some(new_homes)) = self.homes.get(asid.index()) {
                for (&slot, &table) in new_homes {
                    self.directory.place(slot, table);
                }
            }
        }
        self.registry.set_current(asid)
    }

    fn assign_page_table(
        &mut self,
        table: PageTableId,
        linear_addr: VmAddress,
        flags: AssignFlags,
        targets: Option<&[Asid]>,
        in_use: bool,
    ) -> MmuResult<()> {
        let slot = self.layout.directory_slot(linear_addr);

        if !self.map.is_local(linear_addr) {
            // run region 之外只有共享的一份
            if self.directory.get(slot) == Some(table) {
                return Ok(());
            }
            if !self.directory.can_place(slot, table) {
                return Err(MmuError::TableAlreadyPlaced);
            }
            if in_use {
                return Err(MmuError::TableInUse);
            }
            self.directory.place(slot, table);
            return Ok(());
        }

        // run region 随进程搬移，不能放全局页表
        if flags.contains(AssignFlags::GLOBAL) {
            return Err(MmuError::RegionMismatch);
        }

        let current = self.registry.current();
        let targets = resolve_targets(targets, &current)?;
        for &asid in targets {
            let homes = self.homes(asid).ok_or(MmuError::InvalidAsid)?;
            match homes.get(&slot) {
                Some(&placed) if placed != table => return Err(MmuError::TableAlreadyPlaced),
                None if in_use => return Err(MmuError::TableInUse),
                _ => {}
            }
        }
        for &asid in targets {
            if let Some(Some(homes)) = self.homes.get_mut(asid.index()) {
                if homes.insert(slot, table).is_none() {
                    self.registry.pin(asid);
                }
            }
            if current == Some(asid) {
                self.directory.place(slot, table);
            }
        }
        Ok(())
    }

    #[inline]
    fn lookup(&self, view: Option<Asid>, addr: VmAddress) -> Option<(PageTableId, MapScope)> {
        let slot = self.layout.directory_slot(addr);
        if let Some(asid) = view {
            if !self.registry.contains(asid) {
                return None;
            }
        }

        if !self.map.is_local(addr) {
            return self.directory.get(slot).map(|table| (table, MapScope::Global));
        }

        let asid = view?;
        let table = if self.registry.current() == Some(asid) {
            self.directory.get(slot)
        } else {
            self.homes(asid)?.get(&slot).copied()
        };
        table.map(|table| (table, MapScope::Local(asid)))
    }

    fn placements(&self, table: PageTableId, linear_addr: VmAddress) -> Vec<MapScope> {
        let slot = self.layout.directory_slot(linear_addr);
        if !self.map.is_local(linear_addr) {
            if self.directory.get(slot) == Some(table) {
                return vec![MapScope::Global];
            }
            return Vec::new();
        }
        self.homes
            .iter()
            .enumerate()
            .filter(|(_, homes)| {
                homes.as_ref().and_then(|homes| homes.get(&slot)) == Some(&table)
            })
            .map(|(index, _)| MapScope::Local(Asid::new(index as u16)))
            .collect()
    }

    fn detach_page_table(&mut self, table: PageTableId) {
        self.directory.detach(table);
        for (index, homes) in self.homes.iter_mut().enumerate() {
            let Some(homes) = homes else {
                continue;
            };
            let before = homes.len();
            homes.retain(|_, placed| *placed != table);
            for _ in homes.len()..before {
                self.registry.unpin(Asid::new(index as u16));
            }
        }
    }

    fn free_addr_space(&mut self, asid: Asid) -> MmuResult<()> {
        self.registry.release(asid)?;
        self.homes[asid.index()] = None;
        Ok(())
    }
}
