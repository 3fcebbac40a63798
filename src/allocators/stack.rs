//! LIFO bump allocator: allocations must be freed in reverse order.
//!
//! Grounded on
//! `examples/original_source/include/allo/impl/stack_allocator.h`.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::capability::{Basic, Stack};
use crate::config::StackConfig;
use crate::error::{AllocError, AllocResult};
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

/// Per-allocation bookkeeping placed immediately before the user pointer,
/// 8-byte aligned so it can always be found by walking backward from a
/// freed pointer without ambiguity.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
struct Bookkeeping {
    previous_available_offset: usize,
    previous_type_hashcode: u64,
}

const BK_SIZE: usize = size_of::<Bookkeeping>();

pub struct StackAllocator {
    memory: NonNull<u8>,
    capacity: usize,
    /// Offset from `memory` where unused space begins.
    available_offset: usize,
    last_type_hashcode: u64,
}

impl StackAllocator {
    /// Wraps `buffer` as a LIFO stack allocator. `_config` is reserved for
    /// future buffer-alignment requirements; the buffer's own alignment is
    /// used as-is today.
    pub fn new(buffer: BytesBlock, _config: StackConfig) -> AllocResult<Self> {
        if buffer.len() < BK_SIZE {
            return Err(AllocError::invalid_argument());
        }
        Ok(Self {
            memory: buffer.data(),
            capacity: buffer.len(),
            available_offset: 0,
            last_type_hashcode: TypeHash::UNTYPED.raw(),
        })
    }

    #[inline]
    fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }

    fn base_addr(&self) -> usize {
        self.memory.as_ptr() as usize
    }
}

impl Basic for StackAllocator {
    fn alloc(&mut self, size: usize, align_exp: u32, typehash: TypeHash) -> AllocResult<BytesBlock> {
        let align = 1usize << align_exp;
        // The bookkeeping record sits immediately before the user pointer,
        // with no gap between them: align up to `max(align, 8)` first (so
        // the result satisfies both the record's 8-byte alignment and the
        // caller's requested alignment), then place the record in the
        // `BK_SIZE` bytes directly preceding it. This keeps `free`'s
        // backward recovery a single fixed-size step regardless of what
        // alignment the allocation requested.
        let combined_align = align.max(8);
        let user_offset = Self::align_up(self.available_offset + BK_SIZE, combined_align);
        let bk_offset = user_offset - BK_SIZE;
        let end_offset = user_offset.checked_add(size).ok_or_else(AllocError::out_of_memory)?;
        if end_offset > self.capacity {
            return Err(AllocError::out_of_memory());
        }

        // SAFETY: `bk_offset + BK_SIZE <= user_offset <= capacity`, and the
        // bookkeeping record's 8-byte alignment is satisfied by `align_up`.
        unsafe {
            let bk_ptr = self.memory.as_ptr().add(bk_offset) as *mut Bookkeeping;
            bk_ptr.write(Bookkeeping {
                previous_available_offset: self.available_offset,
                previous_type_hashcode: self.last_type_hashcode,
            });
        }

        self.available_offset = end_offset;
        self.last_type_hashcode = typehash.raw();

        // SAFETY: `user_offset + size <= capacity`.
        let user_ptr = unsafe { self.memory.as_ptr().add(user_offset) };
        Ok(BytesBlock::new(NonNull::new(user_ptr).unwrap(), size))
    }

    fn properties(&self) -> AllocProperties {
        AllocProperties { max_contiguous_bytes: self.capacity, max_alignment: 1 << 20 }
    }

    unsafe fn register_destruction_callback(
        &mut self,
        f: unsafe fn(*mut u8),
        userdata: *mut u8,
    ) -> AllocResult<()> {
        // Entries grow downward from the top of `capacity`, mirroring the
        // scratch allocator's scheme; a single fixed-size slot suffices
        // because the stack discipline means callbacks unwind in the same
        // LIFO order as allocations, so no chain traversal is needed beyond
        // a simple linked list through the reserved high end.
        let slot_size = size_of::<crate::callback::CallbackEntry>();
        if self.available_offset + slot_size > self.capacity {
            return Err(AllocError::out_of_memory());
        }
        self.capacity -= slot_size;
        // SAFETY: `self.capacity` was just shrunk by `slot_size`, carving
        // out an unused region at the new top of the buffer.
        unsafe {
            let slot_ptr = self.memory.as_ptr().add(self.capacity) as *mut crate::callback::CallbackEntry;
            slot_ptr.write(crate::callback::CallbackEntry { f, userdata });
        }
        Ok(())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Stack
    }
}

impl Stack for StackAllocator {
    fn remap(
        &mut self,
        _block: BytesBlock,
        _old_typehash: TypeHash,
        _new_size: usize,
        _new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock> {
        // Growing in place would require the allocation to already be the
        // top of the stack and would still risk colliding with the
        // bookkeeping-walk invariant on a subsequent free; not supported.
        Err(AllocError::out_of_memory())
    }

    fn free(&mut self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()> {
        self.free_status(block, typehash)?;

        if typehash.raw() != self.last_type_hashcode {
            return Err(AllocError::invalid_type());
        }
        let block_addr = block.data().as_ptr() as usize;
        if block_addr < self.base_addr() || block_addr > self.base_addr() + self.capacity {
            return Err(AllocError::memory_invalid());
        }

        // The bookkeeping record sits in the `BK_SIZE` bytes immediately
        // below this allocation's offset, with no alignment padding between
        // them (see `alloc`'s placement), so walking backward is a single
        // fixed-size step rather than a search.
        let user_offset = block_addr - self.base_addr();
        let bk_offset = user_offset.checked_sub(BK_SIZE).ok_or_else(AllocError::corruption)?;

        // SAFETY: `bk_offset` was computed from a live allocation's offset
        // and lies within `[0, capacity)` by the bounds check above.
        let bookkeeping = unsafe { *(self.memory.as_ptr().add(bk_offset) as *const Bookkeeping) };

        if bookkeeping.previous_available_offset > user_offset {
            return Err(AllocError::corruption());
        }

        self.available_offset = bookkeeping.previous_available_offset;
        self.last_type_hashcode = bookkeeping.previous_type_hashcode;
        Ok(())
    }

    fn free_status(&self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()> {
        if typehash.raw() != self.last_type_hashcode {
            return Err(AllocError::invalid_type());
        }
        let block_addr = block.data().as_ptr() as usize;
        if block_addr < self.base_addr() || block_addr > self.base_addr() + self.capacity {
            return Err(AllocError::memory_invalid());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator(size: usize) -> (Vec<u8>, StackAllocator) {
        let mut buf = vec![0u8; size];
        let block = BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len());
        let allocator = StackAllocator::new(block, StackConfig::default()).unwrap();
        (buf, allocator)
    }

    #[test]
    fn lifo_alloc_free_restores_offset() {
        let (_buf, mut allocator) = make_allocator(512);
        let a = allocator.alloc(64, 3, TypeHash::UNTYPED).unwrap();
        let b = allocator.alloc(64, 3, TypeHash::UNTYPED).unwrap();
        let offset_after_b = allocator.available_offset;
        assert!(offset_after_b > 0);
        allocator.free(b, TypeHash::UNTYPED).unwrap();
        allocator.free(a, TypeHash::UNTYPED).unwrap();
        assert_eq!(allocator.available_offset, 0);
    }

    #[test]
    fn out_of_order_free_is_rejected_by_type_mismatch() {
        use crate::typehash::type_hash;
        let (_buf, mut allocator) = make_allocator(512);
        let a = allocator.alloc(32, 3, type_hash::<u32>()).unwrap();
        let _b = allocator.alloc(32, 3, type_hash::<u64>()).unwrap();
        // `a` is no longer the top allocation: the allocator's last-type
        // bookkeeping now reflects `b`'s type, so freeing `a` first is
        // rejected rather than silently rewinding past a live allocation.
        assert!(matches!(allocator.free(a, type_hash::<u32>()), Err(AllocError::InvalidType { .. })));
    }

    #[test]
    fn free_recovers_bookkeeping_past_alignment_padding() {
        // Two successive allocations requesting 16-byte alignment (align_exp
        // 4, above the bookkeeping record's own 8-byte alignment) leave
        // padding between each record and its user pointer; freeing them in
        // LIFO order must still land on the real bookkeeping record rather
        // than inside that padding.
        let (_buf, mut allocator) = make_allocator(512);
        let a = allocator.alloc(24, 4, TypeHash::UNTYPED).unwrap();
        let b = allocator.alloc(24, 4, TypeHash::UNTYPED).unwrap();
        assert_eq!(b.data().as_ptr() as usize % 16, 0);
        allocator.free(b, TypeHash::UNTYPED).unwrap();
        allocator.free(a, TypeHash::UNTYPED).unwrap();
        assert_eq!(allocator.available_offset, 0);
    }

    #[test]
    fn oom_when_buffer_exhausted() {
        let (_buf, mut allocator) = make_allocator(64);
        let result = allocator.alloc(496, 0, TypeHash::UNTYPED);
        assert!(result.is_err());
    }
}
