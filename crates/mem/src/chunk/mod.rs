//! Chunk：可增长的已提交内存区域
//!
//! chunk 在创建时保留 `[base, base + max_size)`，分配并放置覆盖整段的页表，
//! 同时申请同样大小的宿主后备内存。[`Chunk::adjust`] 按页提交或撤销，
//! 每一页都是一条独立的宿主映射，因此可以在任意页边界收缩。
//!
//! chunk 是 MMU 映射操作的调用方：提交走 `map_to_host_cpu`，撤销走 `unmap_from_host_cpu`。
//! `Drop` 时先撤销全部页、释放页表，最后才释放后备内存。

mod allocator;

pub use allocator::ChunkAllocator;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::address::VmAddress;
use crate::asid::Asid;
use crate::error::{MmuError, MmuResult};
use crate::mmu::Mmu;
use crate::page_table::{AssignFlags, PageTableId, Prot};

/// 已提交内存区域
pub struct Chunk<'a> {
    mmu: &'a Mmu<'a>,
    base: VmAddress,
    max_size: usize,
    committed: usize,
    prot: Prot,
    owner: Option<Asid>,
    tables: Vec<PageTableId>,
    backing: NonNull<[u8]>,
}

impl<'a> Chunk<'a> {
    /// 在 `base` 处保留 `max_size` 字节
    ///
    /// `base` 必须按 chunk 粒度对齐，`max_size` 向上取整到 chunk 粒度。
    /// `owner` 为 `None` 时页表全局放置，否则只放入该地址空间。
    pub fn new(
        mmu: &'a Mmu<'a>,
        base: VmAddress,
        max_size: usize,
        prot: Prot,
        owner: Option<Asid>,
    ) -> MmuResult<Self> {
        let layout = *mmu.layout();
        let chunk_size = layout.chunk_size() as usize;
        if base & layout.chunk_mask() != 0 {
            return Err(MmuError::Unaligned);
        }
        if max_size == 0 || base as u64 + max_size as u64 > 1u64 << 32 {
            return Err(MmuError::InvalidSize);
        }
        let max_size = max_size.div_ceil(chunk_size) * chunk_size;
        if base as u64 + max_size as u64 > 1u64 << 32 {
            return Err(MmuError::InvalidSize);
        }

        let (flags, targets) = match owner {
            None => (AssignFlags::GLOBAL, None),
            Some(_) if mmu.memory_map().is_local(base) => (AssignFlags::empty(), owner),
            Some(_) => (AssignFlags::LOCAL_GLOBAL_REGION, owner),
        };

        let mut tables = Vec::new();
        let span = layout.table_span();
        for offset in (0..max_size).step_by(span) {
            let placed = mmu.create_new_page_table().and_then(|table| {
                tables.push(table);
                mmu.assign_page_table(
                    table,
                    base + offset as VmAddress,
                    flags,
                    targets.as_ref().map(core::slice::from_ref),
                )
            });
            if let Err(err) = placed {
                for &table in &tables {
                    if let Err(free_err) = mmu.free_page_table(table) {
                        log::warn!("chunk: failed to free page table {:?}: {:?}", table, free_err);
                    }
                }
                return Err(err);
            }
        }

        let backing = NonNull::from(Box::leak(vec![0u8; max_size].into_boxed_slice()));

        log::debug!(
            "chunk: reserved {:#010x}..{:#010x}",
            base,
            base as u64 + max_size as u64
        );

        Ok(Self {
            mmu,
            base,
            max_size,
            committed: 0,
            prot,
            owner,
            tables,
            backing,
        })
    }

    /// 客户机基址
    pub fn base(&self) -> VmAddress {
        self.base
    }

    /// 保留大小
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 已提交大小
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// 所属地址空间；全局 chunk 为 `None`
    pub fn owner(&self) -> Option<Asid> {
        self.owner
    }

    /// 后备内存起始处的宿主机指针
    pub fn host_base(&self) -> NonNull<u8> {
        self.backing.cast()
    }

    /// 把已提交大小调整为 `new_size`（向上取整到页）
    ///
    /// 增长时逐页映射，收缩时逐页撤销。中途失败时本次已完成的页全部回滚，
    /// `committed` 保持调用前的值。
    pub fn adjust(&mut self, new_size: usize) -> MmuResult<()> {
        let target = self.mmu.layout().page_align_up(new_size);
        if target > self.max_size {
            return Err(MmuError::InvalidSize);
        }

        let before = self.committed;
        if let Err(err) = self.resize(target) {
            if let Err(undo) = self.resize(before) {
                log::warn!(
                    "chunk: failed to roll back {:#010x} to {:#x}: {:?}",
                    self.base,
                    before,
                    undo
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn resize(&mut self, target: usize) -> MmuResult<()> {
        let page_size = self.mmu.layout().page_size();
        while self.committed < target {
            let addr = self.base + self.committed as VmAddress;
            // SAFETY: 页位于本 chunk 的后备内存之内，后备内存在 Drop 撤销所有页之后才释放
            unsafe {
                let host = self.host_base().add(self.committed);
                self.mmu.map_in(self.owner, addr, page_size, host, self.prot)?;
            }
            self.committed += page_size;
        }
        while self.committed > target {
            let addr = self.base + (self.committed - page_size) as VmAddress;
            self.mmu.unmap_in(self.owner, addr, page_size)?;
            self.committed -= page_size;
        }
        Ok(())
    }
}

impl Drop for Chunk<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.adjust(0) {
            // 映射撤不下来时不能释放后备内存
            log::error!("chunk: failed to decommit {:#010x}: {:?}", self.base, err);
            return;
        }
        for &table in &self.tables {
            if let Err(err) = self.mmu.free_page_table(table) {
                log::warn!("chunk: failed to free page table {:?}: {:?}", table, err);
            }
        }
        // SAFETY: backing 来自 Box::leak，且所有映射已经撤销
        drop(unsafe { Box::from_raw(self.backing.as_ptr()) });
    }
}
