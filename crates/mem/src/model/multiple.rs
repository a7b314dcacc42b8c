//! 多地址空间模型
//!
//! 每个地址空间拥有独立的页目录；另有一个全局页目录，
//! 对所有地址空间（包括之后才创建的）可见。查找时先查本地槽位，再查全局槽位。

use alloc::vec;
use alloc::vec::Vec;

use super::{MapScope, MemModelType, MemoryModel, PageDirectory, resolve_targets};
use crate::address::VmAddress;
use crate::asid::{Asid, AsidRegistry};
use crate::config::{AddressLayout, MemoryMap, RolloverPolicy};
use crate::error::{MmuError, MmuResult};
use crate::page_table::{AssignFlags, PageTableId};

/// 地址空间槽位数（含保留的 0 号）
pub const MULTIPLE_MAX_ADDR_SPACES: usize = 256;

/// 多地址空间模型
pub struct MultipleModel {
    layout: AddressLayout,
    map: MemoryMap,
    registry: AsidRegistry,
    global: PageDirectory,
    locals: Vec<Option<PageDirectory>>,
}

impl MultipleModel {
    /// 创建模型
    pub fn new(layout: AddressLayout, map: MemoryMap, policy: RolloverPolicy) -> Self {
        Self {
            layout,
            map,
            registry: AsidRegistry::new(MULTIPLE_MAX_ADDR_SPACES, policy),
            global: PageDirectory::new(layout.directory_slots()),
            locals: vec![None; MULTIPLE_MAX_ADDR_SPACES],
        }
    }

    fn local(&self, asid: Asid) -> Option<&PageDirectory> {
        self.locals.get(asid.index())?.as_ref()
    }
}

impl MemoryModel for MultipleModel {
    fn model_type(&self) -> MemModelType {
        MemModelType::Multiple
    }

    fn registry(&self) -> &AsidRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut AsidRegistry {
        &mut self.registry
    }

    fn rollover_fresh_addr_space(&mut self) -> Option<Asid> {
        let asid = self.registry.rollover()?.asid();
        // 复用的空间也从空页目录开始
        self.locals[asid.index()] = Some(PageDirectory::new(self.layout.directory_slots()));
        Some(asid)
    }

    fn set_current_addr_space(&mut self, asid: Asid) -> bool {
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

        if flags.contains(AssignFlags::GLOBAL) {
            if self.global.get(slot) == Some(table) {
                return Ok(());
            }
            // 任何空间在该槽位放有本地页表时，全局页表会被遮住
            let shadowed = self.locals.iter().flatten().any(|dir| dir.get(slot).is_some());
            if !self.global.can_place(slot, table) || shadowed {
                return Err(MmuError::TableAlreadyPlaced);
            }
            if in_use {
                return Err(MmuError::TableInUse);
            }
            self.global.place(slot, table);
            return Ok(());
        }

        if !self.map.is_local(linear_addr) && !flags.contains(AssignFlags::LOCAL_GLOBAL_REGION) {
            return Err(MmuError::RegionMismatch);
        }
        if self.global.get(slot).is_some() {
            return Err(MmuError::TableAlreadyPlaced);
        }

        let current = self.registry.current();
        let targets = resolve_targets(targets, &current)?;
        for &asid in targets {
            let dir = self.local(asid).ok_or(MmuError::InvalidAsid)?;
            if !dir.can_place(slot, table) {
                return Err(MmuError::TableAlreadyPlaced);
            }
            if in_use && dir.get(slot) != Some(table) {
                return Err(MmuError::TableInUse);
            }
        }
        for &asid in targets {
            if let Some(Some(dir)) = self.locals.get_mut(asid.index()) {
                if dir.get(slot) != Some(table) {
                    dir.place(slot, table);
                    self.registry.pin(asid);
                }
            }
        }
        Ok(())
    }

    #[inline]
    fn lookup(&self, view: Option<Asid>, addr: VmAddress) -> Option<(PageTableId, MapScope)> {
        let slot = self.layout.directory_slot(addr);
        if let Some(asid) = view {
            if let Some(table) = self.local(asid)?.get(slot) {
                return Some((table, MapScope::Local(asid)));
            }
        }
        self.global.get(slot).map(|table| (table, MapScope::Global))
    }

    fn placements(&self, table: PageTableId, linear_addr: VmAddress) -> Vec<MapScope> {
        let slot = self.layout.directory_slot(linear_addr);
        if self.global.get(slot) == Some(table) {
            return vec![MapScope::Global];
        }
        self.locals
            .iter()
            .enumerate()
            .filter(|(_, dir)| dir.as_ref().and_then(|dir| dir.get(slot)) == Some(table))
            .map(|(index, _)| MapScope::Local(Asid::new(index as u16)))
            .collect()
    }

    fn detach_page_table(&mut self, table: PageTableId) {
        self.global.detach(table);
        for (index, dir) in self.locals.iter_mut().enumerate() {
            let Some(dir) = dir else {
                continue;
            };
            for _ in 0..dir.detach(table) {
                self.registry.unpin(Asid::new(index as u16));
            }
        }
    }

    fn free_addr_space(&mut self, asid: Asid) -> MmuResult<()> {
        self.registry.release(asid)?;
        self.locals[asid.index()] = None;
        Ok(())
    }
}
