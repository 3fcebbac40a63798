//! The four capability tiers every allocator kind is consumed through.
//!
//! Mirrors the trait-based allocator surface in
//! `nebula-memory::allocator::traits`, but structured as a supertrait
//! lattice (`Basic ⊂ Stack ⊂ Heap ⊂ ThreadsafeHeap`) rather than one flat
//! trait, so that a concrete allocator kind which cannot support a tier
//! simply does not implement it — misuse is a compile error, not a runtime
//! `InvalidArgument`.

use crate::error::AllocResult;
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

/// The weakest tier: can allocate, report its properties, and accept
/// destruction callbacks, but offers no way to free or resize what it
/// handed out. Implemented by every allocator kind.
pub trait Basic {
    /// Allocates `size` bytes aligned to `1 << align_exp`, tagging the
    /// allocation with `typehash` (or [`TypeHash::UNTYPED`] for opaque
    /// bytes). Leaves allocator state unchanged on failure.
    fn alloc(&mut self, size: usize, align_exp: u32, typehash: TypeHash) -> AllocResult<BytesBlock>;

    /// The size/alignment bounds this allocator can ever satisfy.
    fn properties(&self) -> AllocProperties;

    /// Registers `f(userdata)` to run when this allocator is destroyed, in
    /// reverse registration order relative to other registered callbacks.
    ///
    /// # Safety
    /// `f` must be safe to call with `userdata` at any point up to and
    /// including this allocator's destruction, and `userdata` must remain
    /// valid until then.
    unsafe fn register_destruction_callback(
        &mut self,
        f: unsafe fn(*mut u8),
        userdata: *mut u8,
    ) -> AllocResult<()>;

    /// Diagnostic tag for the concrete type behind this trait object.
    fn kind(&self) -> AllocatorKind;
}

/// Adds resizing-in-place and freeing. Allocators that enforce LIFO
/// ordering on frees (the stack allocator) still implement this tier; the
/// ordering requirement is a behavioral contract documented per-kind, not a
/// structural difference in the trait.
pub trait Stack: Basic {
    /// Resizes `block` to `new_size`, preserving its base address, checking
    /// that `old_typehash` matches what the block was allocated/last
    /// remapped with and tagging the result with `new_typehash`.
    fn remap(
        &mut self,
        block: BytesBlock,
        old_typehash: TypeHash,
        new_size: usize,
        new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock>;

    /// Releases `block` back to the allocator. For kinds that enforce LIFO
    /// freeing, `block` must be the most recently outstanding allocation.
    fn free(&mut self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()>;

    /// Dry-run of [`Stack::free`]: validates the request but never mutates
    /// allocator state, regardless of outcome.
    fn free_status(&self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()>;

    /// Zero-cost upcast to the weaker tier.
    #[inline]
    fn as_basic(&mut self) -> &mut dyn Basic
    where
        Self: Sized,
    {
        self
    }
}

/// Same surface as [`Stack`]; a marker supertrait documenting that frees
/// need not occur in any particular order.
pub trait Heap: Stack {
    #[inline]
    fn as_stack(&mut self) -> &mut dyn Stack
    where
        Self: Sized,
    {
        self
    }
}

/// Adds a reentrant realloc safe to call concurrently with itself and with
/// `alloc`/`free` on the same allocator. Implemented only by the system
/// heap wrapper, whose backing allocator is already thread-safe.
pub trait ThreadsafeHeap: Heap + Sync {
    /// Safe to call concurrently with itself or with `alloc`/`free` on the
    /// same allocator.
    fn threadsafe_realloc(
        &self,
        block: BytesBlock,
        old_typehash: TypeHash,
        new_size: usize,
        new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock>;
}
