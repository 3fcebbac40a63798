//! Monotonic bump ("scratch") arena, optionally growing by acquiring more
//! buffers from a parent allocator when the current one is exhausted.
//!
//! Grounded on
//! `examples/original_source/include/allo/impl/scratch_allocator.h`.
//! Destruction-callback invocation is corrected: the original only walked
//! the current buffer's high end at destruction, so a callback registered
//! after growth into a new buffer was never reachable. This implementation
//! keeps one callback chain per acquired buffer and walks all of them, most
//! recently acquired first.

use core::ptr::NonNull;

use alloc_crate::vec;
use alloc_crate::vec::Vec;

use crate::capability::{Basic, Stack};
use crate::config::{round_up_to_valid_buffersize, ScratchConfig};
use crate::error::{AllocError, AllocResult};
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

struct Segment {
    memory: NonNull<u8>,
    capacity: usize,
    /// Offset from `memory` where unused space begins (grows upward).
    bump_offset: usize,
    /// Offset from `memory` where the callback region begins (grows
    /// downward from `capacity`).
    callback_offset: usize,
    /// Whether this segment was acquired from `parent` via `grow` (and so
    /// must be freed back to it at destruction), as opposed to the initial
    /// buffer supplied by the caller of `new`/`with_parent`.
    owned_by_parent: bool,
}

pub struct ScratchAllocator<'p> {
    segments: Vec<Segment>,
    parent: Option<&'p mut dyn Stack>,
    min_growth_bytes: usize,
}

impl<'p> ScratchAllocator<'p> {
    pub fn new(buffer: BytesBlock, config: ScratchConfig) -> AllocResult<Self> {
        if buffer.is_empty() {
            return Err(AllocError::invalid_argument());
        }
        Ok(Self {
            segments: vec![Segment {
                memory: buffer.data(),
                capacity: buffer.len(),
                bump_offset: 0,
                callback_offset: buffer.len(),
                owned_by_parent: false,
            }],
            parent: None,
            min_growth_bytes: config.min_growth_bytes,
        })
    }

    pub fn with_parent(buffer: BytesBlock, parent: &'p mut dyn Stack, config: ScratchConfig) -> AllocResult<Self> {
        let mut allocator = Self::new(buffer, config)?;
        allocator.parent = Some(parent);
        Ok(allocator)
    }

    #[inline]
    fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }

    fn current(&self) -> &Segment {
        self.segments.last().expect("at least one segment always present")
    }

    fn current_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("at least one segment always present")
    }

    fn try_alloc_in_current(&mut self, size: usize, align: usize) -> Option<BytesBlock> {
        let seg = self.current_mut();
        let aligned = Self::align_up(seg.bump_offset, align);
        let end = aligned.checked_add(size)?;
        if end > seg.callback_offset {
            return None;
        }
        seg.bump_offset = end;
        // SAFETY: `aligned + size <= callback_offset <= capacity`.
        let ptr = unsafe { seg.memory.as_ptr().add(aligned) };
        Some(BytesBlock::new(NonNull::new(ptr).unwrap(), size))
    }

    fn grow(&mut self, shortfall: usize) -> AllocResult<()> {
        let parent = self.parent.as_deref_mut().ok_or_else(AllocError::out_of_memory)?;
        let unit = self.min_growth_bytes.max(self.current().capacity);
        let new_size = round_up_to_valid_buffersize(shortfall, unit);
        let block = parent.alloc(new_size, 0, TypeHash::UNTYPED)?;
        self.segments.push(Segment {
            memory: block.data(),
            capacity: block.len(),
            bump_offset: 0,
            callback_offset: block.len(),
            owned_by_parent: true,
        });
        Ok(())
    }
}

impl<'p> Basic for ScratchAllocator<'p> {
    fn alloc(&mut self, size: usize, align_exp: u32, _typehash: TypeHash) -> AllocResult<BytesBlock> {
        let align = 1usize << align_exp;
        if let Some(block) = self.try_alloc_in_current(size, align) {
            return Ok(block);
        }
        // Growth is sized against the worst case of needing both the
        // aligned start and the requested bytes in the fresh segment.
        self.grow(size + align)?;
        self.try_alloc_in_current(size, align).ok_or_else(AllocError::out_of_memory)
    }

    fn properties(&self) -> AllocProperties {
        let bounded = self.parent.is_none();
        AllocProperties {
            max_contiguous_bytes: if bounded { self.current().capacity } else { 0 },
            max_alignment: 1 << 16,
        }
    }

    unsafe fn register_destruction_callback(
        &mut self,
        f: unsafe fn(*mut u8),
        userdata: *mut u8,
    ) -> AllocResult<()> {
        let entry_size = core::mem::size_of::<crate::callback::CallbackEntry>();
        let seg = self.current_mut();
        if seg.callback_offset < seg.bump_offset + entry_size {
            return Err(AllocError::out_of_memory());
        }
        seg.callback_offset -= entry_size;
        let offset = seg.callback_offset;
        // SAFETY: `offset` was just carved out of unused space strictly
        // above `bump_offset` and below the previous `callback_offset`.
        unsafe {
            let ptr = seg.memory.as_ptr().add(offset) as *mut crate::callback::CallbackEntry;
            ptr.write(crate::callback::CallbackEntry { f, userdata });
        }
        Ok(())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Scratch
    }
}

impl<'p> Drop for ScratchAllocator<'p> {
    fn drop(&mut self) {
        let entry_size = core::mem::size_of::<crate::callback::CallbackEntry>();
        // Walk every acquired segment's callback region, most recent
        // segment first, not just the currently active one.
        for seg in self.segments.iter().rev() {
            let mut offset = seg.callback_offset;
            while offset + entry_size <= seg.capacity {
                // SAFETY: every slot between `callback_offset` and
                // `capacity` was written by `register_destruction_callback`
                // and not yet invoked.
                unsafe {
                    let ptr = seg.memory.as_ptr().add(offset) as *const crate::callback::CallbackEntry;
                    let entry = ptr.read();
                    (entry.f)(entry.userdata);
                }
                offset += entry_size;
            }
        }
        if let Some(parent) = self.parent.as_deref_mut() {
            for seg in self.segments.drain(..).filter(|s| s.owned_by_parent) {
                let block = BytesBlock::new(seg.memory, seg.capacity);
                let _ = parent.free(block, TypeHash::UNTYPED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_allocator(size: usize) -> (Vec<u8>, ScratchAllocator<'static>) {
        let mut buf = vec![0u8; size];
        let block = BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len());
        let allocator = ScratchAllocator::new(block, ScratchConfig::default()).unwrap();
        (buf, allocator)
    }

    #[test]
    fn bumps_forward() {
        let (_buf, mut allocator) = make_allocator(256);
        let a = allocator.alloc(32, 3, TypeHash::UNTYPED).unwrap();
        let b = allocator.alloc(32, 3, TypeHash::UNTYPED).unwrap();
        assert!(b.start_addr() >= a.end_addr());
    }

    #[test]
    fn oom_without_parent() {
        let (_buf, mut allocator) = make_allocator(16);
        assert!(allocator.alloc(64, 0, TypeHash::UNTYPED).is_err());
    }

    #[test]
    fn callbacks_across_segments_all_fire() {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        unsafe fn bump(_: *mut u8) {
            COUNTER.fetch_add(1, Ordering::SeqCst);
        }

        let mut parent_buf = vec![0u8; 4096];
        let parent_block = BytesBlock::new(NonNull::new(parent_buf.as_mut_ptr()).unwrap(), parent_buf.len());
        let mut parent = crate::allocators::heap::HeapAllocator::new(parent_block, Default::default()).unwrap();

        let mut buf = vec![0u8; 32];
        let block = BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len());
        let mut allocator =
            ScratchAllocator::with_parent(block, &mut parent, ScratchConfig::default()).unwrap();

        unsafe {
            allocator.register_destruction_callback(bump, core::ptr::null_mut()).unwrap();
        }
        // Force growth into a second segment.
        let _ = allocator.alloc(256, 0, TypeHash::UNTYPED).unwrap();
        unsafe {
            allocator.register_destruction_callback(bump, core::ptr::null_mut()).unwrap();
        }
        drop(allocator);
        assert_eq!(COUNTER.load(Ordering::SeqCst), 2);
    }
}
