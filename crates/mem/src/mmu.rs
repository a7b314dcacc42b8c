//! MMU 核心
//!
//! CPU 核心与系统服务访问客户机内存的唯一入口：
//! 翻译地址、读写客户机内存、管理页表与地址空间，并把宿主映射转告 CPU 核心。
//!
//! # 锁
//!
//! 结构状态（内存模型与宿主映射记录）由一把读写锁保护：翻译与读写走读锁，
//! 结构修改走写锁。需要同时访问页表池时，总是先取 MMU 的锁，再取池的锁。
//!
//! # 跨页访问
//!
//! 跨越页边界的访问逐页拼接。所有页先完成翻译与权限检查再搬运数据，
//! 因此失败的写不会写入任何字节。
//!
//! # 宿主映射记账
//!
//! 映射记录按 (首页所在页表, 起始地址) 登记。页表可以放进多个地址空间，
//! 一条映射在某个视图中可见，当且仅当它的首页在该视图中解析到同一张页表；
//! 一条映射跨越的所有页表放置位置相同，所以首页即可代表整条映射。
//! CPU 核心上装着的，始终是当前视图中可见的全部映射。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;

use sync::RwLock;

use crate::address::{VmAddress, VpnRange};
use crate::asid::Asid;
use crate::config::{AddressLayout, EmulatorConfig, MemoryMap};
use crate::cpu::CpuCore;
use crate::error::{MmuError, MmuResult};
use crate::model::{MapScope, MemModelType, MemoryModel, MovingModel, MultipleModel};
use crate::page_table::{
    AssignFlags, PageTable, PageTableAllocator, PageTableEntry, PageTableId, Prot,
};

/// 4 KiB 页大小
pub const PAGE_SIZE_BYTES_12B: usize = 0x1000;
/// 1 MiB 页大小
pub const PAGE_SIZE_BYTES_20B: usize = 0x10_0000;

/// 一条宿主映射记录
#[derive(Debug, Clone, Copy)]
struct HostMapping {
    size: usize,
    host: usize,
    prot: Prot,
}

impl HostMapping {
    fn host_ptr(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.host as *mut u8)
    }
}

/// 映射记录的键：首页所在页表与起始地址
type MappingKey = (PageTableId, VmAddress);

struct MmuInner {
    model: Box<dyn MemoryModel>,
    mappings: BTreeMap<MappingKey, HostMapping>,
}

impl MmuInner {
    /// 映射在 `view` 视图中是否可见
    fn is_visible(&self, view: Option<Asid>, &(table, addr): &MappingKey) -> bool {
        self.model
            .lookup(view, addr)
            .is_some_and(|(found, _)| found == table)
    }

    fn check_view(&self, view: Option<Asid>) -> MmuResult<()> {
        match view {
            Some(asid) if !self.model.registry().contains(asid) => Err(MmuError::InvalidAsid),
            _ => Ok(()),
        }
    }
}

/// 内存管理单元
///
/// 页表池、CPU 核心与配置都由调用方持有，MMU 只保存引用。
pub struct Mmu<'a> {
    alloc: &'a PageTableAllocator,
    cpu: &'a dyn CpuCore,
    conf: &'a EmulatorConfig,
    layout: AddressLayout,
    mem_map: MemoryMap,
    mem_map_old: bool,
    inner: RwLock<MmuInner>,
}

macro_rules! scalar_access {
    ($($ty:ty => $read:ident, $write:ident;)*) => {
        $(
            #[doc = concat!("读取一个小端 `", stringify!($ty), "`")]
            pub fn $read(&self, addr: VmAddress) -> MmuResult<$ty> {
                let mut bytes = [0u8; core::mem::size_of::<$ty>()];
                self.read_bytes(addr, &mut bytes)?;
                Ok(<$ty>::from_le_bytes(bytes))
            }

            #[doc = concat!("写入一个小端 `", stringify!($ty), "`")]
            pub fn $write(&self, addr: VmAddress, value: $ty) -> MmuResult<()> {
                self.write_bytes(addr, &value.to_le_bytes())
            }
        )*
    };
}

impl<'a> Mmu<'a> {
    /// 创建 MMU
    ///
    /// `page_size_bits` 只能是 12 或 20，否则返回 [`MmuError::InvalidPageSize`]。
    /// `mem_map_old` 选择旧内存布局，`model` 选择内存模型，二者此后不可更改。
    pub fn new(
        alloc: &'a PageTableAllocator,
        cpu: &'a dyn CpuCore,
        conf: &'a EmulatorConfig,
        page_size_bits: usize,
        mem_map_old: bool,
        model: MemModelType,
    ) -> MmuResult<Self> {
        let layout = AddressLayout::from_page_size_bits(page_size_bits)?;
        let mem_map = MemoryMap::for_generation(mem_map_old);
        let model: Box<dyn MemoryModel> = match model {
            MemModelType::Multiple => Box::new(MultipleModel::new(
                layout,
                mem_map.clone(),
                conf.rollover_policy,
            )),
            MemModelType::Moving => Box::new(MovingModel::new(
                layout,
                mem_map.clone(),
                conf.rollover_policy,
            )),
        };

        log::info!(
            "mmu: {:?} model, page size {:#x}, {} memory map",
            model.model_type(),
            layout.page_size(),
            if mem_map_old { "legacy" } else { "modern" }
        );

        Ok(Self {
            alloc,
            cpu,
            conf,
            layout,
            mem_map,
            mem_map_old,
            inner: RwLock::new(MmuInner {
                model,
                mappings: BTreeMap::new(),
            }),
        })
    }

    /// 页大小（字节）
    pub fn page_size(&self) -> usize {
        if self.layout.page_size_bits() == 12 {
            PAGE_SIZE_BYTES_12B
        } else {
            PAGE_SIZE_BYTES_20B
        }
    }

    /// 地址运算常量
    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    /// 内存布局
    pub fn memory_map(&self) -> &MemoryMap {
        &self.mem_map
    }

    /// 是否使用旧内存布局
    pub fn using_old_mem_map(&self) -> bool {
        self.mem_map_old
    }

    /// 内存模型类型
    pub fn model_type(&self) -> MemModelType {
        self.inner.read().model.model_type()
    }

    /// 按 ID 访问页表
    pub fn get_page_table_by_id<R>(
        &self,
        id: PageTableId,
        f: impl FnOnce(&PageTable) -> R,
    ) -> Option<R> {
        self.alloc.get_page_table_by_id(id, f)
    }

    /// 创建一张新页表
    ///
    /// 新页表不属于任何页目录，直到通过 [`Mmu::assign_page_table`] 放置。
    pub fn create_new_page_table(&self) -> MmuResult<PageTableId> {
        self.alloc
            .create(self.layout.entries_per_table())
            .ok_or(MmuError::OutOfTables)
    }

    /// 从所有页目录摘除页表并归还给池
    ///
    /// 页表中仍有映射时返回 [`MmuError::TableInUse`]。
    /// 摘除后，放有它的地址空间不再因它被 pin 住。
    pub fn free_page_table(&self, table: PageTableId) -> MmuResult<()> {
        let mut inner = self.inner.write();
        let mapped = self
            .alloc
            .get_page_table_by_id(table, PageTable::mapped_count)
            .ok_or(MmuError::InvalidPageTable)?;
        if mapped != 0 {
            return Err(MmuError::TableInUse);
        }
        inner.model.detach_page_table(table);
        self.alloc.free(table);
        Ok(())
    }

    /// 创建或复用一个地址空间
    ///
    /// 表满且策略不允许复用时返回 `None`。
    pub fn rollover_fresh_addr_space(&self) -> Option<Asid> {
        let asid = self.inner.write().model.rollover_fresh_addr_space();
        if asid.is_none() {
            log::warn!("mmu: address spaces exhausted, rollover failed");
        }
        asid
    }

    /// 释放地址空间
    ///
    /// 当前空间或仍放有页表的空间返回 [`MmuError::AddressSpaceInUse`]。
    pub fn free_addr_space(&self, asid: Asid) -> MmuResult<()> {
        self.inner.write().model.free_addr_space(asid)
    }

    /// 切换当前地址空间
    ///
    /// 只在旧视图中可见的映射从 CPU 撤下，只在新视图中可见的映射装上，最后通知 CPU。
    /// 两个视图都能看到的映射（全局映射、共享页表中的映射）保持不动。
    /// 未知的 ASID 返回 [`MmuError::InvalidAsid`]，当前空间保持不变。
    pub fn set_current_addr_space(&self, asid: Asid) -> MmuResult<()> {
        let mut inner = self.inner.write();
        let old = inner.model.current_addr_space();
        if !inner.model.set_current_addr_space(asid) {
            return Err(MmuError::InvalidAsid);
        }
        if old == Some(asid) {
            return Ok(());
        }

        let new = Some(asid);
        let mut incoming = Vec::new();
        for (key, mapping) in &inner.mappings {
            match (inner.is_visible(old, key), inner.is_visible(new, key)) {
                (true, false) => {
                    if !self.cpu.unmap_memory(key.1, mapping.size) {
                        log::warn!("mmu: cpu failed to unmap {:#010x} on switch", key.1);
                    }
                }
                (false, true) => incoming.push((key.1, *mapping)),
                _ => {}
            }
        }
        for (addr, mapping) in incoming {
            let Some(host) = mapping.host_ptr() else {
                continue;
            };
            if !self.cpu.map_backing_mem(addr, mapping.size, host, mapping.prot) {
                log::warn!("mmu: cpu failed to map {:#010x} on switch", addr);
            }
        }
        self.cpu.on_addr_space_switch(asid);
        Ok(())
    }

    /// 当前地址空间
    pub fn current_addr_space(&self) -> Option<Asid> {
        self.inner.read().model.current_addr_space()
    }

    /// 把页表放到 `linear_addr` 处
    ///
    /// `flags` 含 [`AssignFlags::GLOBAL`] 时对所有地址空间可见；否则放入 `targets`
    /// 列出的地址空间，未给出时放入当前地址空间。
    /// 一张页表只有一个线性基址，再次放置必须使用相同的地址。
    ///
    /// 槽位已被其他页表占用（包括另一侧页目录中会被遮住或遮住新页表的情况）时返回
    /// [`MmuError::TableAlreadyPlaced`]；已有映射的页表放到新位置时返回
    /// [`MmuError::TableInUse`]。
    pub fn assign_page_table(
        &self,
        table: PageTableId,
        linear_addr: VmAddress,
        flags: AssignFlags,
        targets: Option<&[Asid]>,
    ) -> MmuResult<()> {
        if !self.layout.is_table_aligned(linear_addr) {
            return Err(MmuError::Unaligned);
        }

        let mut inner = self.inner.write();
        let base = self
            .alloc
            .get_page_table_by_id(table, PageTable::linear_base)
            .ok_or(MmuError::InvalidPageTable)?;
        if base.is_some_and(|base| base != linear_addr) {
            return Err(MmuError::TableAlreadyPlaced);
        }

        // 已有映射的页表只能重复已有的放置
        let in_use = self
            .alloc
            .get_page_table_by_id(table, PageTable::mapped_count)
            .is_some_and(|mapped| mapped != 0);
        inner
            .model
            .assign_page_table(table, linear_addr, flags, targets, in_use)?;
        self.alloc
            .with_page_table_mut(table, |t| t.set_linear_base(linear_addr));
        Ok(())
    }

    /// 在地址空间 `asid` 中把客户机地址解析为宿主机指针
    pub fn get_host_pointer(&self, asid: Asid, addr: VmAddress) -> MmuResult<NonNull<u8>> {
        let inner = self.inner.read();
        inner.check_view(Some(asid))?;
        self.translate(&inner, Some(asid), addr).map(|(ptr, _)| ptr)
    }

    /// 把 `[addr, addr + size)` 映射到宿主内存 `host`，供 CPU 直接访问
    ///
    /// 作用于当前视图：范围内每一页都必须已有页表覆盖，且覆盖整段的页表放置位置相同。
    /// 地址与长度必须按页对齐，不能与已有映射重叠。
    ///
    /// # Safety
    /// `host` 必须指向至少 `size` 字节的可读写内存，并且在这段映射被
    /// [`Mmu::unmap_from_host_cpu`] 解除之前保持有效。
    pub unsafe fn map_to_host_cpu(
        &self,
        addr: VmAddress,
        size: usize,
        host: NonNull<u8>,
        prot: Prot,
    ) -> MmuResult<()> {
        let mut inner = self.inner.write();
        let view = inner.model.current_addr_space();
        // SAFETY: 由调用方保证
        unsafe { self.map_locked(&mut inner, view, addr, size, host, prot) }
    }

    /// 同 [`Mmu::map_to_host_cpu`]，但作用于指定视图
    ///
    /// # Safety
    /// 同 [`Mmu::map_to_host_cpu`]。
    pub(crate) unsafe fn map_in(
        &self,
        view: Option<Asid>,
        addr: VmAddress,
        size: usize,
        host: NonNull<u8>,
        prot: Prot,
    ) -> MmuResult<()> {
        let mut inner = self.inner.write();
        inner.check_view(view)?;
        // SAFETY: 由调用方保证
        unsafe { self.map_locked(&mut inner, view, addr, size, host, prot) }
    }

    /// 解除 `[addr, addr + size)` 的宿主映射
    ///
    /// 范围必须恰好由若干条完整的映射拼成，否则返回
    /// [`MmuError::PartialUnmap`] 且原映射保持不变。
    pub fn unmap_from_host_cpu(&self, addr: VmAddress, size: usize) -> MmuResult<()> {
        let mut inner = self.inner.write();
        let view = inner.model.current_addr_space();
        self.unmap_locked(&mut inner, view, addr, size)
    }

    /// 同 [`Mmu::unmap_from_host_cpu`]，但作用于指定视图
    pub(crate) fn unmap_in(
        &self,
        view: Option<Asid>,
        addr: VmAddress,
        size: usize,
    ) -> MmuResult<()> {
        let mut inner = self.inner.write();
        inner.check_view(view)?;
        self.unmap_locked(&mut inner, view, addr, size)
    }

    /// 宿主映射记录数
    pub fn host_mapping_count(&self) -> usize {
        self.inner.read().mappings.len()
    }

    scalar_access! {
        u8 => read_u8, write_u8;
        u16 => read_u16, write_u16;
        u32 => read_u32, write_u32;
        u64 => read_u64, write_u64;
    }

    /// 从当前视图读取 `buf.len()` 字节
    pub fn read_bytes(&self, addr: VmAddress, buf: &mut [u8]) -> MmuResult<()> {
        if self.conf.log_read {
            log::debug!("mmu: read {:#010x} len {}", addr, buf.len());
        }
        let inner = self.inner.read();
        let view = inner.model.current_addr_space();
        self.walk(&inner, view, addr, buf.len(), Prot::READ, |host, offset, len| {
            // SAFETY: host 指向已映射页内的 len 个字节
            unsafe {
                core::ptr::copy_nonoverlapping(
                    host.as_ptr(),
                    buf[offset..offset + len].as_mut_ptr(),
                    len,
                );
            }
        })
    }

    /// 向当前视图写入 `data`
    pub fn write_bytes(&self, addr: VmAddress, data: &[u8]) -> MmuResult<()> {
        if self.conf.log_write {
            log::debug!("mmu: write {:#010x} len {}", addr, data.len());
        }
        let inner = self.inner.read();
        let view = inner.model.current_addr_space();
        self.walk(&inner, view, addr, data.len(), Prot::WRITE, |host, offset, len| {
            // SAFETY: host 指向已映射页内的 len 个字节
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data[offset..offset + len].as_ptr(),
                    host.as_ptr(),
                    len,
                );
            }
        })
    }

    /// 页对齐检查，返回覆盖的页码范围
    fn check_range(&self, addr: VmAddress, size: usize) -> MmuResult<VpnRange> {
        if size == 0 {
            return Err(MmuError::InvalidSize);
        }
        if !self.layout.is_page_aligned(addr as usize) || !self.layout.is_page_aligned(size) {
            return Err(MmuError::Unaligned);
        }
        if addr as u64 + size as u64 > 1u64 << 32 {
            return Err(MmuError::InvalidSize);
        }
        Ok(VpnRange::from_addr_size(addr, size, &self.layout))
    }

    #[inline]
    fn translate(
        &self,
        inner: &MmuInner,
        view: Option<Asid>,
        addr: VmAddress,
    ) -> MmuResult<(NonNull<u8>, Prot)> {
        let (table, _) = inner
            .model
            .lookup(view, addr)
            .ok_or(MmuError::NotMapped(addr))?;
        let index = self.layout.table_entry_index(addr);
        let entry = self
            .alloc
            .get_page_table_by_id(table, |t| t.entry(index).copied())
            .flatten()
            .ok_or(MmuError::NotMapped(addr))?;
        let base = entry.host_ptr().ok_or(MmuError::NotMapped(addr))?;
        // SAFETY: 偏移小于页大小，而映射的宿主内存至少覆盖整页
        let host = unsafe { base.add(self.layout.page_offset(addr)) };
        Ok((host, entry.prot()))
    }

    /// 逐页访问 `[addr, addr + len)`：先整体检查，再依次回调
    fn walk(
        &self,
        inner: &MmuInner,
        view: Option<Asid>,
        addr: VmAddress,
        len: usize,
        access: Prot,
        f: impl FnMut(NonNull<u8>, usize, usize),
    ) -> MmuResult<()> {
        self.walk_pages(inner, view, addr, len, access, |_, _, _| {})?;
        self.walk_pages(inner, view, addr, len, access, f)
    }

    fn walk_pages(
        &self,
        inner: &MmuInner,
        view: Option<Asid>,
        addr: VmAddress,
        len: usize,
        access: Prot,
        mut f: impl FnMut(NonNull<u8>, usize, usize),
    ) -> MmuResult<()> {
        let page_size = self.layout.page_size();
        let mut done = 0;
        while done < len {
            let current = u32::try_from(addr as u64 + done as u64)
                .map_err(|_| MmuError::NotMapped(addr))?;
            let (host, prot) = self.translate(inner, view, current)?;
            if !prot.contains(access) {
                return Err(MmuError::PermissionDenied(current));
            }
            let chunk = (page_size - self.layout.page_offset(current)).min(len - done);
            f(host, done, chunk);
            done += chunk;
        }
        Ok(())
    }

    /// # Safety
    /// 同 [`Mmu::map_to_host_cpu`]。
    unsafe fn map_locked(
        &self,
        inner: &mut MmuInner,
        view: Option<Asid>,
        addr: VmAddress,
        size: usize,
        host: NonNull<u8>,
        prot: Prot,
    ) -> MmuResult<()> {
        let range = self.check_range(addr, size)?;

        // 先检查整段，失败时不做任何修改
        let mut tables: Vec<(PageTableId, usize)> = Vec::with_capacity(range.len());
        let mut placements = None;
        for vpn in range {
            let page = vpn.start_addr(&self.layout);
            let (table, _) = inner
                .model
                .lookup(view, page)
                .ok_or(MmuError::NoPageTable(page))?;
            if tables.last().is_none_or(|&(last, _)| last != table) {
                let here = inner.model.placements(table, page);
                if *placements.get_or_insert_with(|| here.clone()) != here {
                    return Err(MmuError::ScopeMismatch);
                }
            }
            let index = self.layout.table_entry_index(page);
            let mapped = self
                .alloc
                .get_page_table_by_id(table, |t| t.entry(index).is_some_and(|e| e.is_mapped()))
                .ok_or(MmuError::NoPageTable(page))?;
            if mapped {
                return Err(MmuError::Overlap(page));
            }
            tables.push((table, index));
        }
        let &(first, _) = tables.first().ok_or(MmuError::InvalidSize)?;
        let key = (first, addr);

        let current = inner.model.current_addr_space();
        if inner.is_visible(current, &key) && !self.cpu.map_backing_mem(addr, size, host, prot) {
            log::error!("mmu: cpu rejected mapping {:#010x} size {:#x}", addr, size);
            return Err(MmuError::CpuRejected);
        }

        let page_size = self.layout.page_size();
        for (page, (table, index)) in tables.into_iter().enumerate() {
            // SAFETY: 调用方保证 host 覆盖 size 字节
            let page_host = unsafe { host.add(page * page_size) };
            self.alloc.with_page_table_mut(table, |t| {
                t.set_entry(index, PageTableEntry::new(page_host, prot))
            });
        }

        inner.mappings.insert(
            key,
            HostMapping {
                size,
                host: host.as_ptr() as usize,
                prot,
            },
        );
        Ok(())
    }

    fn unmap_locked(
        &self,
        inner: &mut MmuInner,
        view: Option<Asid>,
        addr: VmAddress,
        size: usize,
    ) -> MmuResult<()> {
        let range = self.check_range(addr, size)?;
        if inner.model.lookup(view, addr).is_none() {
            return Err(MmuError::NotMapped(addr));
        }

        // 范围必须恰好由若干条在该视图中可见的完整映射首尾相接拼成
        let end = addr as u64 + size as u64;
        let mut cursor = addr as u64;
        let mut keys = Vec::new();
        while cursor < end {
            let start = cursor as VmAddress;
            let (table, _) = inner
                .model
                .lookup(view, start)
                .ok_or(MmuError::PartialUnmap)?;
            let mapping = inner
                .mappings
                .get(&(table, start))
                .ok_or(MmuError::PartialUnmap)?;
            if cursor + mapping.size as u64 > end {
                return Err(MmuError::PartialUnmap);
            }
            cursor += mapping.size as u64;
            keys.push((table, start));
        }

        self.unmap_visible_on_cpu(inner, &keys)?;

        for vpn in range {
            let page = vpn.start_addr(&self.layout);
            if let Some((table, _)) = inner.model.lookup(view, page) {
                let index = self.layout.table_entry_index(page);
                self.alloc
                    .with_page_table_mut(table, |t| t.set_entry(index, PageTableEntry::UNMAPPED));
            }
        }
        for key in keys {
            inner.mappings.remove(&key);
        }
        Ok(())
    }

    /// 把 `keys` 中当前可见的映射从 CPU 撤下，相邻的合并为一次调用
    ///
    /// CPU 拒绝时把已经撤下的段重新装回，返回 [`MmuError::CpuRejected`]。
    fn unmap_visible_on_cpu(&self, inner: &MmuInner, keys: &[MappingKey]) -> MmuResult<()> {
        let current = inner.model.current_addr_space();
        let mut runs: Vec<(VmAddress, usize, Vec<HostMapping>)> = Vec::new();
        for key in keys {
            let Some(&mapping) = inner.mappings.get(key) else {
                continue;
            };
            if !inner.is_visible(current, key) {
                continue;
            }
            let adjacent = runs
                .last_mut()
                .filter(|(start, len, _)| *start as u64 + *len as u64 == key.1 as u64);
            if let Some((_, len, parts)) = adjacent {
                *len += mapping.size;
                parts.push(mapping);
                continue;
            }
            runs.push((key.1, mapping.size, vec![mapping]));
        }

        for (done, (start, len, _)) in runs.iter().enumerate() {
            if self.cpu.unmap_memory(*start, *len) {
                continue;
            }
            log::error!("mmu: cpu rejected unmapping {:#010x} size {:#x}", start, len);
            for (start, _, parts) in &runs[..done] {
                let mut addr = *start;
                for part in parts {
                    let restored = part.host_ptr().is_some_and(|host| {
                        self.cpu.map_backing_mem(addr, part.size, host, part.prot)
                    });
                    if !restored {
                        log::warn!("mmu: cpu failed to restore {:#010x}", addr);
                    }
                    addr = addr.wrapping_add(part.size as VmAddress);
                }
            }
            return Err(MmuError::CpuRejected);
        }
        Ok(())
    }

    /// 当前视图中 `addr` 处的页表放置信息
    pub fn page_table_at(&self, addr: VmAddress) -> Option<(PageTableId, MapScope)> {
        let inner = self.inner.read();
        let view = inner.model.current_addr_space();
        inner.model.lookup(view, addr)
    }
}
