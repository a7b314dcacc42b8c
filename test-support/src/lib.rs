//! 测试支持 crate
//!
//! 提供各子系统测试用的 Mock 实现

#![no_std]

pub mod mock;
