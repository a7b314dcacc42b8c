//! MMU 错误类型

use crate::address::VmAddress;

/// MMU 操作中可能发生的错误
///
/// 除 [`MmuError::InvalidPageSize`] 外都是可恢复错误；
/// 返回错误的操作不会留下任何部分修改。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    /// 不支持的页大小位数（只支持 12 与 20）
    InvalidPageSize(usize),
    /// 客户机地址在当前视图中没有映射
    NotMapped(VmAddress),
    /// 映射存在但保护位不允许此次访问
    PermissionDenied(VmAddress),
    /// 地址或长度没有按页对齐
    Unaligned,
    /// 长度为 0 或超出 32 位地址空间
    InvalidSize,
    /// 与已有映射重叠
    Overlap(VmAddress),
    /// 解除映射的范围不是若干完整映射的并集
    PartialUnmap,
    /// 该地址没有页表覆盖
    NoPageTable(VmAddress),
    /// 范围跨越了放置位置不同的页表（全局与本地，或不同的地址空间）
    ScopeMismatch,
    /// 未知的 ASID
    InvalidAsid,
    /// 当前没有地址空间，且调用未指定目标
    NoAddressSpace,
    /// 地址空间仍是当前空间或仍放有页表
    AddressSpaceInUse,
    /// 未知或已释放的页表 ID
    InvalidPageTable,
    /// 页表已放置在其他位置，或目标槽位已被其他页表占用
    TableAlreadyPlaced,
    /// 页表中仍有已映射的表项（不能释放，也不能放到新的位置）
    TableInUse,
    /// 本地放置超出本地区域且未设置 `LOCAL_GLOBAL_REGION`
    RegionMismatch,
    /// 页表池耗尽
    OutOfTables,
    /// CPU 核心拒绝了映射请求
    CpuRejected,
}

/// MMU 操作的结果类型
pub type MmuResult<T> = Result<T, MmuError>;
