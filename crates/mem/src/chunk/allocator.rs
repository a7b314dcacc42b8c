//! chunk 上的块分配器
//!
//! 在 chunk 已提交区域内按首次适应 (first-fit) 分配块，释放时与相邻空闲块合并。
//! 找不到合适的空闲块时从尾部切分，尾部不够则调用 [`ChunkAllocator::expand`]
//! 让 chunk 提交更多页。

use alloc::vec::Vec;

use super::Chunk;
use crate::address::VmAddress;

/// 块对齐
const BLOCK_ALIGN: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    size: usize,
    active: bool,
}

/// chunk 块分配器
pub struct ChunkAllocator<'a> {
    chunk: Chunk<'a>,
    /// 按偏移排序，首尾相接；最后一块之后到提交末尾都是空闲的
    blocks: Vec<Block>,
}

impl<'a> ChunkAllocator<'a> {
    /// 接管一个 chunk
    pub fn new(chunk: Chunk<'a>) -> Self {
        Self {
            chunk,
            blocks: Vec::new(),
        }
    }

    /// 底层 chunk
    pub fn chunk(&self) -> &Chunk<'a> {
        &self.chunk
    }

    /// 分配 `size` 字节，返回客户机地址
    pub fn allocate(&mut self, size: usize) -> Option<VmAddress> {
        if size == 0 {
            return None;
        }
        let size = size.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN;

        if let Some(pos) = self.blocks.iter().position(|b| !b.active && b.size >= size) {
            let block = self.blocks[pos];
            if block.size > size {
                self.blocks.insert(
                    pos + 1,
                    Block {
                        offset: block.offset + size,
                        size: block.size - size,
                        active: false,
                    },
                );
            }
            self.blocks[pos] = Block {
                offset: block.offset,
                size,
                active: true,
            };
            return Some(self.address_of(block.offset));
        }

        let offset = self.blocks.last().map_or(0, |b| b.offset + b.size);
        let end = offset + size;
        if end > self.chunk.committed() && !self.expand(end) {
            return None;
        }
        self.blocks.push(Block {
            offset,
            size,
            active: true,
        });
        Some(self.address_of(offset))
    }

    /// 释放 `addr` 处的块
    ///
    /// 不是已分配块的起始地址时返回 `false`。
    pub fn free(&mut self, addr: VmAddress) -> bool {
        let Some(offset) = addr.checked_sub(self.chunk.base()).map(|o| o as usize) else {
            return false;
        };
        let Some(pos) = self
            .blocks
            .iter()
            .position(|b| b.active && b.offset == offset)
        else {
            return false;
        };

        self.blocks[pos].active = false;
        // 与后一块合并
        if pos + 1 < self.blocks.len() && !self.blocks[pos + 1].active {
            let next = self.blocks.remove(pos + 1);
            self.blocks[pos].size += next.size;
        }
        // 与前一块合并
        let pos = if pos > 0 && !self.blocks[pos - 1].active {
            let cur = self.blocks.remove(pos);
            self.blocks[pos - 1].size += cur.size;
            pos - 1
        } else {
            pos
        };
        // 尾部空闲块并回尾部
        if pos + 1 == self.blocks.len() {
            self.blocks.pop();
        }
        true
    }

    /// 让 chunk 至少提交 `target` 字节
    pub fn expand(&mut self, target: usize) -> bool {
        match self.chunk.adjust(target) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("chunk allocator: expand to {:#x} failed: {:?}", target, err);
                false
            }
        }
    }

    /// 已分配块占用的字节数
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.iter().filter(|b| b.active).map(|b| b.size).sum()
    }

    fn address_of(&self, offset: usize) -> VmAddress {
        self.chunk.base() + offset as VmAddress
    }
}
