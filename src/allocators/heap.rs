//! General-purpose segregated free-list heap allocator. Can grow either by
//! remapping its current buffer in place (if its parent supports `Stack`)
//! or by acquiring additional buffers from a `Basic` parent and tracking
//! them in a segmented stack so old addresses stay valid.
//!
//! Grounded on
//! `examples/original_source/include/allo/impl/heap_allocator.h`, with the
//! free-common validity check corrected to reject on `size_requested !=
//! freed_len`, not accept on `==`. Growth-via-remap-then-segmented-stack-
//! fallback is grounded on the same file's `grow`/`try_make_space_for_at_least`,
//! cross-checked against `allocator/bump/mod.rs`'s parent-growth pattern.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::capability::{Basic, Heap, Stack};
use crate::collections::segmented_stack::SegmentedStack;
use crate::config::{round_up_to_valid_buffersize, HeapConfig};
use crate::error::{AllocError, AllocResult};
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

const MAGIC: usize = 0xA110_CA7E_DEAD_BEEF_u64 as usize;

#[repr(C)]
struct Bookkeeping {
    size_requested: usize,
    size_actual: usize,
    typehash: u64,
    magic: usize,
}

const BK_SIZE: usize = size_of::<Bookkeeping>();
const BK_ALIGN: usize = align_of::<Bookkeeping>();

#[repr(C)]
struct FreeNode {
    size: usize,
    next: Option<NonNull<FreeNode>>,
}

pub enum GrowthParent<'p> {
    /// Parent that supports in-place `remap`: growth extends the current
    /// buffer without relocating it.
    Remapping(&'p mut dyn Stack),
    /// Parent that only supports `Basic::alloc`: growth acquires a new
    /// buffer and keeps the old one alive in a segmented stack.
    Appending(&'p mut dyn Basic),
}

pub struct HeapAllocator<'p> {
    memory: BytesBlock,
    free_head: Option<NonNull<FreeNode>>,
    original_size: usize,
    min_growth_bytes: usize,
    parent: Option<GrowthParent<'p>>,
    /// Prior buffers kept alive after an `Appending`-style growth; `None`
    /// until the first such growth happens.
    retired_segments: Option<SegmentedStack<BytesBlock>>,
    callback_head: Option<NonNull<u8>>,
}

/// An allocator kind that supports `remap`, used to select `GrowthParent::Remapping`.
pub fn remapping_parent<'p>(parent: &'p mut dyn Stack) -> GrowthParent<'p> {
    GrowthParent::Remapping(parent)
}

/// An allocator kind that only supports `alloc`, used to select `GrowthParent::Appending`.
pub fn appending_parent<'p>(parent: &'p mut dyn Basic) -> GrowthParent<'p> {
    GrowthParent::Appending(parent)
}

impl<'p> HeapAllocator<'p> {
    pub fn new(buffer: BytesBlock, config: HeapConfig) -> AllocResult<Self> {
        if buffer.len() < BK_SIZE {
            return Err(AllocError::invalid_argument());
        }
        let mut allocator = Self {
            memory: buffer,
            free_head: None,
            original_size: buffer.len(),
            min_growth_bytes: config.min_growth_bytes.max(buffer.len()),
            parent: None,
            retired_segments: None,
            callback_head: None,
        };
        allocator.install_free_node(buffer.data(), buffer.len());
        Ok(allocator)
    }

    pub fn with_parent(buffer: BytesBlock, parent: GrowthParent<'p>, config: HeapConfig) -> AllocResult<Self> {
        let mut allocator = Self::new(buffer, config)?;
        allocator.parent = Some(parent);
        Ok(allocator)
    }

    fn install_free_node(&mut self, at: NonNull<u8>, size: usize) {
        if size < size_of::<FreeNode>() {
            return;
        }
        // SAFETY: `at` points to `size` bytes of memory this allocator owns
        // and is not currently handing out to anyone.
        unsafe {
            let node_ptr = at.as_ptr() as *mut FreeNode;
            node_ptr.write(FreeNode { size, next: self.free_head });
        }
        self.free_head = NonNull::new(at.as_ptr() as *mut FreeNode);
    }

    #[inline]
    fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }

    /// Computes, for a free node starting at `node_addr` with `node_size`
    /// bytes, whether a request of `size`/`align` fits after placing the
    /// bookkeeping record. Returns `(user_addr, bk_addr, total_consumed)`.
    fn fits(node_addr: usize, node_size: usize, size: usize, align: usize) -> Option<(usize, usize, usize)> {
        let bk_addr = Self::align_up(node_addr, BK_ALIGN);
        let after_bk = bk_addr.checked_add(BK_SIZE)?;
        let user_addr = Self::align_up(after_bk, align.max(8));
        let end_addr = user_addr.checked_add(size)?;
        let consumed = end_addr.checked_sub(node_addr)?;
        if consumed > node_size {
            return None;
        }
        Some((user_addr, bk_addr, consumed))
    }

    fn remove_from_free_list(&mut self, target: NonNull<FreeNode>) {
        let mut cursor = &mut self.free_head;
        while let Some(mut node) = *cursor {
            if node == target {
                // SAFETY: `node` is a live free-list node.
                let next = unsafe { node.as_ref().next };
                *cursor = next;
                return;
            }
            // SAFETY: `node` is a live free-list node.
            cursor = unsafe { &mut node.as_mut().next };
        }
    }

    fn try_make_space_for_at_least(&mut self, needed: usize) -> AllocResult<()> {
        let new_total = round_up_to_valid_buffersize(self.memory.len() + needed, self.min_growth_bytes);
        let grow_by = new_total - self.memory.len();

        match self.parent.as_mut() {
            Some(GrowthParent::Remapping(parent)) => {
                let new_block = parent.remap(self.memory, TypeHash::UNTYPED, new_total, TypeHash::UNTYPED)?;
                let tail_addr = unsafe { new_block.data().as_ptr().add(self.memory.len()) };
                self.memory = new_block;
                self.install_free_node(NonNull::new(tail_addr).unwrap(), grow_by);
                Ok(())
            }
            Some(GrowthParent::Appending(parent)) => {
                let new_block = parent.alloc(new_total, 0, TypeHash::UNTYPED)?;
                if self.retired_segments.is_none() {
                    self.retired_segments = Some(SegmentedStack::new());
                }
                // The retired-segment chain allocates its own segments
                // through the same `Basic` parent, rather than the global
                // allocator, so a heap allocator's own growth bookkeeping
                // never depends on anything outside the allocator it was
                // handed.
                self.retired_segments.as_mut().unwrap().push(self.memory, &mut **parent)?;
                self.install_free_node(new_block.data(), new_block.len());
                self.memory = new_block;
                Ok(())
            }
            None => Err(AllocError::out_of_memory()),
        }
    }

    fn recover_bookkeeping(&self, user_ptr: NonNull<u8>) -> AllocResult<NonNull<Bookkeeping>> {
        // SAFETY: the word immediately before `user_ptr` was written by
        // this allocator's `alloc` (either the magic sentinel, or a pointer
        // to the true bookkeeping record).
        let marker = unsafe { *(user_ptr.as_ptr().sub(size_of::<usize>()) as *const usize) };
        if marker == MAGIC {
            let bk_ptr = unsafe { user_ptr.as_ptr().sub(BK_SIZE) as *mut Bookkeeping };
            return Ok(NonNull::new(bk_ptr).unwrap());
        }
        let candidate = marker as *mut Bookkeeping;
        if candidate.is_null() || !candidate.is_aligned() {
            return Err(AllocError::corruption());
        }
        Ok(NonNull::new(candidate).unwrap())
    }
}

impl<'p> Basic for HeapAllocator<'p> {
    fn alloc(&mut self, size: usize, align_exp: u32, typehash: TypeHash) -> AllocResult<BytesBlock> {
        if size == 0 {
            return Err(AllocError::invalid_argument());
        }
        let align = 1usize << align_exp;

        let found = {
            let mut cursor = self.free_head;
            let mut result = None;
            while let Some(node) = cursor {
                // SAFETY: `node` is a live free-list node.
                let node_ref = unsafe { node.as_ref() };
                let node_addr = node.as_ptr() as usize;
                if let Some(fit) = Self::fits(node_addr, node_ref.size, size, align) {
                    result = Some((node, node_ref.size, fit));
                    break;
                }
                cursor = node_ref.next;
            }
            result
        };

        let (node, node_size, (user_addr, bk_addr, consumed)) = match found {
            Some(v) => v,
            None => {
                let worst_case = BK_SIZE + align + size;
                self.try_make_space_for_at_least(worst_case)?;
                return self.alloc(size, align_exp, typehash);
            }
        };

        self.remove_from_free_list(node);
        let remainder = node_size - consumed;
        let bk_offset = bk_addr - (node.as_ptr() as usize);

        // `size_actual` spans from the bookkeeping record (where `free`
        // reinstalls a `FreeNode`) to the start of the next free region:
        // either the tail split off below, or the end of the node just
        // removed from the free list when the tail is too small to host a
        // `FreeNode` and gets absorbed into this allocation instead.
        let size_actual = if remainder >= size_of::<FreeNode>() {
            let tail = unsafe { (node.as_ptr() as *mut u8).add(consumed) };
            // SAFETY: `tail` is the unused suffix of the node just removed
            // from the free list, `remainder` bytes long.
            self.install_free_node(NonNull::new(tail).unwrap(), remainder);
            consumed - bk_offset
        } else {
            node_size - bk_offset
        };

        // SAFETY: `bk_addr` lies within the node just removed from the free
        // list and has room for a `Bookkeeping` record before `user_addr`.
        unsafe {
            let bk_ptr = bk_addr as *mut Bookkeeping;
            bk_ptr.write(Bookkeeping {
                size_requested: size,
                size_actual,
                typehash: typehash.raw(),
                magic: MAGIC,
            });
            let marker_ptr = (user_addr as *mut u8).sub(size_of::<usize>()) as *mut usize;
            if user_addr - size_of::<usize>() == bk_addr + BK_SIZE - size_of::<usize>() {
                marker_ptr.write(MAGIC);
            } else {
                marker_ptr.write(bk_addr);
            }
        }

        let ptr = NonNull::new(user_addr as *mut u8).unwrap();
        Ok(BytesBlock::new(ptr, size))
    }

    fn properties(&self) -> AllocProperties {
        AllocProperties { max_contiguous_bytes: 0, max_alignment: 1 << 20 }
    }

    unsafe fn register_destruction_callback(
        &mut self,
        f: unsafe fn(*mut u8),
        userdata: *mut u8,
    ) -> AllocResult<()> {
        // Nodes are obtained through this allocator's own `alloc`, each
        // holding exactly one entry plus a link to the previous node,
        // matching the heap allocator's general-purpose (not fixed-size)
        // nature.
        #[repr(C)]
        struct Node {
            entry: crate::callback::CallbackEntry,
            prev: Option<NonNull<u8>>,
        }
        let block = self.alloc(size_of::<Node>(), align_of::<Node>().trailing_zeros(), TypeHash::UNTYPED)?;
        // SAFETY: `block` was just allocated with room for exactly one `Node`.
        unsafe {
            let node_ptr = block.data().as_ptr() as *mut Node;
            node_ptr.write(Node { entry: crate::callback::CallbackEntry { f, userdata }, prev: self.callback_head });
        }
        self.callback_head = Some(block.data());
        Ok(())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Heap
    }
}

impl<'p> Stack for HeapAllocator<'p> {
    fn remap(
        &mut self,
        block: BytesBlock,
        old_typehash: TypeHash,
        new_size: usize,
        new_typehash: TypeHash,
    ) -> AllocResult<BytesBlock> {
        if old_typehash != new_typehash {
            return Err(AllocError::invalid_argument());
        }
        let bk = self.recover_bookkeeping(block.data())?;
        // SAFETY: `bk` was recovered from a live allocation of this allocator.
        let bk_ref = unsafe { bk.as_ref() };
        if bk_ref.typehash != old_typehash.raw() {
            return Err(AllocError::invalid_type());
        }
        if new_size > bk_ref.size_actual {
            return Err(AllocError::out_of_memory());
        }
        // SAFETY: same bookkeeping record, exclusive access via `&mut self`.
        unsafe { (*bk.as_ptr()).size_requested = new_size };
        Ok(BytesBlock::new(block.data(), new_size))
    }

    fn free(&mut self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()> {
        let bk = self.recover_bookkeeping(block.data())?;
        // SAFETY: `bk` was recovered from a live allocation of this allocator.
        let bk_ref = unsafe { bk.as_ref() };
        if bk_ref.typehash != typehash.raw() {
            return Err(AllocError::invalid_type());
        }
        // Reject when the freed length does not match what was requested.
        if bk_ref.size_requested != block.len() {
            return Err(AllocError::memory_invalid());
        }
        let node_addr = bk.as_ptr() as usize;
        let node_size = bk_ref.size_actual;
        self.install_free_node(NonNull::new(node_addr as *mut u8).unwrap(), node_size);
        Ok(())
    }

    fn free_status(&self, block: BytesBlock, typehash: TypeHash) -> AllocResult<()> {
        let bk = self.recover_bookkeeping(block.data())?;
        // SAFETY: `bk` was recovered from a live allocation of this allocator.
        let bk_ref = unsafe { bk.as_ref() };
        if bk_ref.typehash != typehash.raw() {
            return Err(AllocError::invalid_type());
        }
        if bk_ref.size_requested != block.len() {
            return Err(AllocError::memory_invalid());
        }
        Ok(())
    }
}

impl<'p> Heap for HeapAllocator<'p> {}

impl<'p> HeapAllocator<'p> {
    fn run_destruction_callbacks(&mut self) {
        #[repr(C)]
        struct Node {
            entry: crate::callback::CallbackEntry,
            prev: Option<NonNull<u8>>,
        }
        let mut cursor = self.callback_head;
        while let Some(node_ptr) = cursor {
            // SAFETY: `node_ptr` names a live node written by
            // `register_destruction_callback`.
            let (entry, prev) = unsafe {
                let node = &*(node_ptr.as_ptr() as *const Node);
                (node.entry, node.prev)
            };
            // SAFETY: entry has not yet been invoked.
            unsafe { (entry.f)(entry.userdata) };
            cursor = prev;
        }
    }
}

impl<'p> Drop for HeapAllocator<'p> {
    fn drop(&mut self) {
        self.run_destruction_callbacks();
        if let Some(GrowthParent::Remapping(parent)) = self.parent.as_mut() {
            let _ = parent.free(self.memory, TypeHash::UNTYPED);
        } else if let Some(GrowthParent::Appending(_)) = self.parent.as_mut() {
            // `Basic`-only parents have no `free`; acquired segments (and
            // the current buffer) are left for the parent's own lifetime
            // to reclaim, matching `OneshotAllocator`'s "buffer persists"
            // contract for such parents.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator(size: usize) -> (Vec<u8>, HeapAllocator<'static>) {
        let mut buf = vec![0u8; size];
        let block = BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len());
        let allocator = HeapAllocator::new(block, HeapConfig::default()).unwrap();
        (buf, allocator)
    }

    #[test]
    fn alloc_free_distinct_addresses() {
        let (_buf, mut allocator) = make_allocator(2776);
        let a = allocator.alloc(16, 0, TypeHash::UNTYPED).unwrap();
        let b = allocator.alloc(16, 0, TypeHash::UNTYPED).unwrap();
        assert_ne!(a.data(), b.data());
        allocator.free(a, TypeHash::UNTYPED).unwrap();
        allocator.free(b, TypeHash::UNTYPED).unwrap();
    }

    #[test]
    fn free_wrong_size_is_rejected() {
        let (_buf, mut allocator) = make_allocator(512);
        let a = allocator.alloc(32, 0, TypeHash::UNTYPED).unwrap();
        let wrong = BytesBlock::new(a.data(), 16);
        assert!(allocator.free(wrong, TypeHash::UNTYPED).is_err());
        allocator.free(a, TypeHash::UNTYPED).unwrap();
    }

    #[test]
    fn free_then_realloc_does_not_leak() {
        // `size` (4) is well under `size_of::<FreeNode>()`, so a buggy
        // `size_actual` (the user byte count rather than the full span back
        // to the bookkeeping record) would make every `free` in this loop
        // drop its reclaimed node outright, exhausting the small buffer.
        let (_buf, mut allocator) = make_allocator(160);
        for _ in 0..20 {
            let a = allocator.alloc(4, 0, TypeHash::UNTYPED).unwrap();
            allocator.free(a, TypeHash::UNTYPED).unwrap();
        }
    }

    #[test]
    fn destruction_callback_fires() {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        unsafe fn bump(_: *mut u8) {
            COUNTER.fetch_add(1, Ordering::SeqCst);
        }
        let (_buf, mut allocator) = make_allocator(512);
        unsafe {
            allocator.register_destruction_callback(bump, core::ptr::null_mut()).unwrap();
        }
        drop(allocator);
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }
}
