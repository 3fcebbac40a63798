//! Wrapper around the process's global allocator. The only kind that
//! implements [`ThreadsafeHeap`] — it is safe to share across threads
//! because `std::alloc::{alloc, realloc, dealloc}` already are.
//!
//! Grounded on `examples/original_source/include/allo/impl/c_allocator.h`
//! and `impl/threadsafe_allocator.h`.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::capability::{Basic, Heap, Stack, ThreadsafeHeap};
use crate::error::{AllocError, AllocResult};
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

/// Natural alignment the global allocator is assumed to honor for requests
/// that ask for less; matches the platform's max scalar alignment.
const NATURAL_ALIGN: usize = 32;

/// Delegates every operation to the process's global allocator.
#[derive(Debug, Default)]
pub struct CHeapAllocator;

impl CHeapAllocator {
    pub const fn new() -> Self {
        Self
    }

    /// Always builds the `Layout` at [`NATURAL_ALIGN`], ignoring the
    /// caller's requested alignment beyond it, since `free`/`threadsafe_realloc`
    /// only have `block.len()` to reconstruct a block's `Layout` from and must
    /// agree with whatever `alloc` used.
    fn layout_for(size: usize, _align_exp: u32) -> AllocResult<Layout> {
        Layout::from_size_align(size, NATURAL_ALIGN).map_err(|_| AllocError::invalid_argument())
    }
}

impl Basic for CHeapAllocator {
    fn alloc(&mut self, size: usize, align_exp: u32, _typehash: TypeHash) -> AllocResult<BytesBlock> {
        let layout = Self::layout_for(size, align_exp)?;
        // SAFETY: `layout` has non-zero alignment; a zero-size layout is
        // valid to pass to the global allocator per its contract.
        let ptr = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or_else(AllocError::out_of_memory)?;
        Ok(BytesBlock::new(base, size))
    }

    fn properties(&self) -> AllocProperties {
        AllocProperties::unbounded(NATURAL_ALIGN)
    }

    unsafe fn register_destruction_callback(
        &mut self,
        _f: unsafe fn(*mut u8),
        _userdata: *mut u8,
    ) -> AllocResult<()> {
        Err(AllocError::invalid_argument())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::CHeap
    }
}

impl Stack for CHeapAllocator {
    fn remap(
        &mut self,
        _block: BytesBlock,
        _old_typehash: TypeHash,
        _new_size: usize,
        _new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock> {
        // The global allocator cannot promise the result won't move; callers
        // who need non-moving resize must use a different allocator kind.
        Err(AllocError::invalid_argument())
    }

    fn free(&mut self, block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        let layout =
            Layout::from_size_align(block.len(), NATURAL_ALIGN).map_err(|_| AllocError::memory_invalid())?;
        // SAFETY: caller guarantees `block` was produced by this allocator's
        // `alloc` and has not already been freed.
        unsafe { std::alloc::dealloc(block.data().as_ptr(), layout) };
        Ok(())
    }

    fn free_status(&self, _block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        Ok(())
    }
}

impl Heap for CHeapAllocator {}

impl ThreadsafeHeap for CHeapAllocator {
    fn threadsafe_realloc(
        &self,
        block: BytesBlock,
        _old_typehash: TypeHash,
        new_size: usize,
        _new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock> {
        let old_layout = Layout::from_size_align(block.len(), NATURAL_ALIGN)
            .map_err(|_| AllocError::memory_invalid())?;
        // SAFETY: `std::alloc::realloc` is reentrant; caller guarantees
        // `block` came from this allocator and `new_size` is non-zero.
        let new_ptr = unsafe { std::alloc::realloc(block.data().as_ptr(), old_layout, new_size) };
        let base = NonNull::new(new_ptr).ok_or_else(AllocError::out_of_memory)?;
        Ok(BytesBlock::new(base, new_size))
    }
}

// SAFETY: the wrapper holds no interior state of its own; every operation
// forwards to the already-thread-safe global allocator.
unsafe impl Sync for CHeapAllocator {}
