//! Wraps a single externally-supplied buffer as an allocator's sole
//! allocation. Used to break allocator dependency cycles: something needs
//! to hand a buffer to e.g. a heap allocator's constructor, but that buffer
//! itself came from somewhere that isn't an allocator at all (a `Vec`, a
//! stack array, a buffer handed in by the embedding application).
//!
//! Grounded on
//! `examples/original_source/include/allo/impl/oneshot_allocator.h`.

use crate::capability::{Basic, Heap, Stack};
use crate::error::{AllocError, AllocResult};
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

pub struct OneshotAllocator {
    buffer: BytesBlock,
}

impl OneshotAllocator {
    /// Wraps `buffer` as the allocator's one and only allocation.
    pub fn new(buffer: BytesBlock) -> Self {
        Self { buffer }
    }

    /// The buffer this allocator wraps, shrunk by any successful `remap`.
    pub fn current_memory(&self) -> BytesBlock {
        self.buffer
    }
}

impl Basic for OneshotAllocator {
    fn alloc(&mut self, _size: usize, _align_exp: u32, _typehash: TypeHash) -> AllocResult<BytesBlock> {
        Err(AllocError::out_of_memory())
    }

    fn properties(&self) -> AllocProperties {
        AllocProperties { max_contiguous_bytes: self.buffer.len(), max_alignment: 1 }
    }

    unsafe fn register_destruction_callback(
        &mut self,
        _f: unsafe fn(*mut u8),
        _userdata: *mut u8,
    ) -> AllocResult<()> {
        Err(AllocError::out_of_memory())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Oneshot
    }
}

impl Stack for OneshotAllocator {
    fn remap(
        &mut self,
        block: BytesBlock,
        _old_typehash: TypeHash,
        new_size: usize,
        _new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock> {
        if block.data() != self.buffer.data() {
            return Err(AllocError::memory_invalid());
        }
        if new_size > self.buffer.len() {
            return Err(AllocError::out_of_memory());
        }
        self.buffer = BytesBlock::new(self.buffer.data(), new_size);
        Ok(self.buffer)
    }

    fn free(&mut self, _block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        // The buffer is not owned by this allocator to give back; it
        // persists until the allocator itself is destroyed.
        Ok(())
    }

    fn free_status(&self, _block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        Ok(())
    }
}

impl Heap for OneshotAllocator {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;

    fn test_block(buf: &mut [u8]) -> BytesBlock {
        BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len())
    }

    #[test]
    fn alloc_always_fails() {
        let mut buf = [0u8; 32];
        let block = test_block(&mut buf);
        let mut allocator = OneshotAllocator::new(block);
        assert!(allocator.alloc(1, 0, TypeHash::UNTYPED).is_err());
    }

    #[test]
    fn remap_only_shrinks() {
        let mut buf = [0u8; 32];
        let block = test_block(&mut buf);
        let mut allocator = OneshotAllocator::new(block);
        let shrunk = allocator.remap(block, TypeHash::UNTYPED, 16, TypeHash::UNTYPED).unwrap();
        assert_eq!(shrunk.len(), 16);
        assert!(allocator.remap(shrunk, TypeHash::UNTYPED, 64, TypeHash::UNTYPED).is_err());
    }

    #[test]
    fn free_is_noop() {
        let mut buf = [0u8; 8];
        let block = test_block(&mut buf);
        let mut allocator = OneshotAllocator::new(block);
        assert!(allocator.free(block, TypeHash::UNTYPED).is_ok());
        assert_eq!(allocator.current_memory(), block);
    }
}
