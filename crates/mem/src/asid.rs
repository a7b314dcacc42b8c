//! 地址空间 (ASID) 登记表
//!
//! ## 分配策略
//!
//! - ASID 0 保留，分配从 1 开始取最小的空闲 ID
//! - 每次创建或切换到某个空间时盖一个递增的时间戳（LRU 依据）
//! - 每个空间有一个 pin 计数，等于放在它名下的页表数（本地映射只能落在这些页表里）
//!
//! 表满时按 [`RolloverPolicy`] 处理：失败，或复用时间戳最旧、
//! 既非当前空间也没有 pin 的空间。时间戳严格递增，因此选择是确定的。

use alloc::vec::Vec;

use crate::config::RolloverPolicy;
use crate::error::{MmuError, MmuResult};

/// 地址空间标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asid(u16);

impl Asid {
    /// 由整数构造（不保证存在）
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// 整数值
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// 作为下标
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// rollover 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    /// 分配了从未使用或已释放的 ID
    Fresh(Asid),
    /// 回收了一个旧空间，调用方需清除它的页目录
    Reused(Asid),
}

impl Rollover {
    /// 得到的 ASID
    pub fn asid(self) -> Asid {
        match self {
            Rollover::Fresh(asid) | Rollover::Reused(asid) => asid,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpaceState {
    last_used: u64,
    pins: usize,
}

/// 地址空间登记表
#[derive(Debug)]
pub struct AsidRegistry {
    spaces: Vec<Option<SpaceState>>,
    current: Option<Asid>,
    clock: u64,
    policy: RolloverPolicy,
}

impl AsidRegistry {
    /// 创建一个有 `capacity` 个槽位（含保留的 0 号）的登记表
    pub fn new(capacity: usize, policy: RolloverPolicy) -> Self {
        let mut spaces = Vec::with_capacity(capacity);
        spaces.resize(capacity.min(u16::MAX as usize + 1), None);
        Self {
            spaces,
            current: None,
            clock: 0,
            policy,
        }
    }

    /// 槽位数（含保留的 0 号）
    pub fn capacity(&self) -> usize {
        self.spaces.len()
    }

    /// 存活的地址空间数
    pub fn len(&self) -> usize {
        self.spaces.iter().filter(|s| s.is_some()).count()
    }

    /// 是否没有任何地址空间
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 策略
    pub fn policy(&self) -> RolloverPolicy {
        self.policy
    }

    /// ASID 是否存在
    #[inline]
    pub fn contains(&self, asid: Asid) -> bool {
        asid.raw() != 0 && matches!(self.spaces.get(asid.index()), Some(Some(_)))
    }

    /// 当前地址空间
    pub fn current(&self) -> Option<Asid> {
        self.current
    }

    /// 创建或复用一个地址空间
    pub fn rollover(&mut self) -> Option<Rollover> {
        let stamp = self.tick();
        if let Some(index) = self.spaces.iter().skip(1).position(|s| s.is_none()) {
            let asid = Asid((index + 1) as u16);
            self.spaces[asid.index()] = Some(SpaceState {
                last_used: stamp,
                pins: 0,
            });
            return Some(Rollover::Fresh(asid));
        }

        if self.policy != RolloverPolicy::EvictLeastRecentlyUsed {
            return None;
        }

        let current = self.current;
        let victim = self
            .spaces
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, state)| state.map(|s| (Asid(index as u16), s)))
            .filter(|(asid, state)| Some(*asid) != current && state.pins == 0)
            .min_by_key(|(_, state)| state.last_used)
            .map(|(asid, _)| asid)?;

        self.spaces[victim.index()] = Some(SpaceState {
            last_used: stamp,
            pins: 0,
        });
        Some(Rollover::Reused(victim))
    }

    /// 设为当前地址空间并刷新其时间戳
    pub fn set_current(&mut self, asid: Asid) -> bool {
        if !self.contains(asid) {
            return false;
        }
        let stamp = self.tick();
        if let Some(Some(state)) = self.spaces.get_mut(asid.index()) {
            state.last_used = stamp;
        }
        self.current = Some(asid);
        true
    }

    /// 增加 pin 计数
    pub fn pin(&mut self, asid: Asid) {
        if let Some(Some(state)) = self.spaces.get_mut(asid.index()) {
            state.pins += 1;
        }
    }

    /// 减少 pin 计数
    pub fn unpin(&mut self, asid: Asid) {
        if let Some(Some(state)) = self.spaces.get_mut(asid.index()) {
            state.pins = state.pins.saturating_sub(1);
        }
    }

    /// pin 计数；空间不存在时为 0
    pub fn pins(&self, asid: Asid) -> usize {
        match self.spaces.get(asid.index()) {
            Some(Some(state)) => state.pins,
            _ => 0,
        }
    }

    /// 释放地址空间
    pub fn release(&mut self, asid: Asid) -> MmuResult<()> {
        if !self.contains(asid) {
            return Err(MmuError::InvalidAsid);
        }
        if self.current == Some(asid) || self.pins(asid) != 0 {
            return Err(MmuError::AddressSpaceInUse);
        }
        self.spaces[asid.index()] = None;
        Ok(())
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
