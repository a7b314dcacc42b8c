//! 页表分配器
//!
//! ## 分配策略（带代数的 arena）
//!
//! - **slots**：页表槽位数组，下标即 ID 的低 16 位
//! - **free**：空闲槽位栈，释放的槽位优先复用
//! - **generation**：每个槽位的代数，释放时递增
//!
//! 查找为 O(1)；过期或越界的 ID 返回 `None`，不会访问到错误的页表。
//! 池由读写锁保护：查找走读锁，创建与释放走写锁，
//! 因此并发查找不会看到构造到一半的页表。

use alloc::vec::Vec;

use sync::RwLock;

use super::{PageTable, PageTableId};

/// 槽位下标的上限（ID 低 16 位）
const MAX_SLOTS: usize = 1 << 16;

struct Slot {
    generation: u16,
    table: Option<PageTable>,
}

struct AllocatorInner {
    slots: Vec<Slot>,
    free: Vec<u16>,
    live: usize,
}

/// 页表池
///
/// 由调用方持有，生命周期必须长于使用它的 MMU。
pub struct PageTableAllocator {
    inner: RwLock<AllocatorInner>,
    limit: usize,
}

impl PageTableAllocator {
    /// 创建一个容量为 65536 张页表的池
    pub fn new() -> Self {
        Self::with_limit(MAX_SLOTS)
    }

    /// 创建一个最多容纳 `limit` 张页表的池（上限 65536）
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: RwLock::new(AllocatorInner {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            limit: limit.min(MAX_SLOTS),
        }
    }

    /// 创建一张有 `entry_count` 个未映射表项的页表
    ///
    /// 池已满时返回 `None`。
    pub fn create(&self, entry_count: usize) -> Option<PageTableId> {
        let mut inner = self.inner.write();
        let index = match inner.free.pop() {
            Some(index) => index,
            None if inner.slots.len() < self.limit => {
                inner.slots.push(Slot {
                    generation: 1,
                    table: None,
                });
                (inner.slots.len() - 1) as u16
            }
            None => return None,
        };

        let slot = &mut inner.slots[index as usize];
        let id = PageTableId::new(index, slot.generation);
        slot.table = Some(PageTable::new(id, entry_count));
        inner.live += 1;
        Some(id)
    }

    /// 按 ID 查找页表并以只读方式访问
    ///
    /// 过期或越界的 ID 返回 `None`。
    #[inline]
    pub fn get_page_table_by_id<R>(
        &self,
        id: PageTableId,
        f: impl FnOnce(&PageTable) -> R,
    ) -> Option<R> {
        let inner = self.inner.read();
        inner.lookup(id).map(f)
    }

    /// 按 ID 查找页表并以可写方式访问
    pub fn with_page_table_mut<R>(
        &self,
        id: PageTableId,
        f: impl FnOnce(&mut PageTable) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write();
        inner.lookup_mut(id).map(f)
    }

    /// ID 是否指向一张存活的页表
    pub fn contains(&self, id: PageTableId) -> bool {
        self.inner.read().lookup(id).is_some()
    }

    /// 释放页表，槽位代数递增
    ///
    /// ID 已过期时返回 `false`。
    pub fn free(&self, id: PageTableId) -> bool {
        let mut inner = self.inner.write();
        if inner.lookup(id).is_none() {
            return false;
        }
        let slot = &mut inner.slots[id.index()];
        slot.table = None;
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            generation => generation,
        };
        inner.free.push(id.index() as u16);
        inner.live -= 1;
        true
    }

    /// 存活页表数
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    /// 池中是否没有存活页表
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PageTableAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorInner {
    fn lookup(&self, id: PageTableId) -> Option<&PageTable> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.table.as_ref())
    }

    fn lookup_mut(&mut self, id: PageTableId) -> Option<&mut PageTable> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.table.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup() {
        let alloc = PageTableAllocator::new();
        let id = alloc.create(256).unwrap();
        assert_eq!(alloc.get_page_table_by_id(id, |t| t.len()), Some(256));
        assert_eq!(alloc.get_page_table_by_id(id, |t| t.linear_base()), Some(None));
        assert_eq!(alloc.len(), 1);
    }

    #[test]
    fn test_stale_id_after_free() {
        let alloc = PageTableAllocator::new();
        let old = alloc.create(16).unwrap();
        assert!(alloc.free(old));
        assert!(!alloc.free(old));

        let new = alloc.create(16).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(alloc.get_page_table_by_id(old, |_| ()).is_none());
        assert!(alloc.contains(new));
    }

    #[test]
    fn test_out_of_range_id() {
        let alloc = PageTableAllocator::new();
        assert!(alloc.get_page_table_by_id(PageTableId::from_raw(0x0001_0042), |_| ()).is_none());
    }

    #[test]
    fn test_limit() {
        let alloc = PageTableAllocator::with_limit(2);
        assert!(alloc.create(1).is_some());
        assert!(alloc.create(1).is_some());
        assert!(alloc.create(1).is_none());
    }
}
