//! Polymorphic typed allocation API (C12): the surface most callers use
//! directly, layered atop the [`crate::capability`] tiers. Attaches the
//! type hash automatically and forwards to whichever allocator the caller
//! passes in.
//!
//! Grounded on
//! `examples/original_source/include/allo/typed_allocation.h`,
//! `typed_freeing.h`, and `typed_reallocation.h`.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::callback::drop_in_place_entry;
use crate::capability::{Basic, Stack};
use crate::error::{AllocError, AllocResult};
use crate::typehash::type_hash;
use crate::types::BytesBlock;

#[inline]
fn align_exp_of<T>() -> u32 {
    core::mem::align_of::<T>().trailing_zeros()
}

/// Allocates uninitialized room for one `T`.
pub fn alloc_one<T: 'static>(allocator: &mut dyn Basic) -> AllocResult<NonNull<T>> {
    let block = allocator.alloc(core::mem::size_of::<T>(), align_exp_of::<T>(), type_hash::<T>())?;
    Ok(block.data().cast())
}

/// Allocates uninitialized room for `n` contiguous `T`s.
pub fn alloc<T: 'static>(allocator: &mut dyn Basic, n: usize) -> AllocResult<&mut [MaybeUninit<T>]> {
    let bytes = n.checked_mul(core::mem::size_of::<T>()).ok_or_else(AllocError::invalid_argument)?;
    let block = allocator.alloc(bytes, align_exp_of::<T>(), type_hash::<T>())?;
    // SAFETY: `block` has room for `n * size_of::<T>()` bytes, correctly
    // aligned for `T`, and is exclusively owned by the caller.
    Ok(unsafe { core::slice::from_raw_parts_mut(block.data().cast().as_ptr(), n) })
}

/// Allocates and initializes one `T`.
pub fn construct_one<T: 'static>(allocator: &mut dyn Basic, value: T) -> AllocResult<NonNull<T>> {
    let ptr = alloc_one::<T>(allocator)?;
    // SAFETY: `ptr` was just allocated with room for exactly one `T`.
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}

/// Allocates `n` `T`s and initializes each with `f(index)`.
pub fn construct_many<T: 'static>(
    allocator: &mut dyn Basic,
    n: usize,
    mut f: impl FnMut(usize) -> T,
) -> AllocResult<&mut [T]> {
    let slots = alloc::<T>(allocator, n)?;
    for (i, slot) in slots.iter_mut().enumerate() {
        slot.write(f(i));
    }
    // SAFETY: every slot was just initialized above.
    Ok(unsafe { &mut *(slots as *mut [MaybeUninit<T>] as *mut [T]) })
}

/// Frees a single `T` previously obtained from [`alloc_one`]/[`construct_one`].
pub fn free_one<T: 'static>(allocator: &mut dyn Stack, ptr: NonNull<T>) -> AllocResult<()> {
    let block = BytesBlock::new(ptr.cast(), core::mem::size_of::<T>());
    allocator.free(block, type_hash::<T>())
}

/// Frees a slice previously obtained from [`alloc`]/[`construct_many`].
pub fn free<T: 'static>(allocator: &mut dyn Stack, slice: &mut [T]) -> AllocResult<()> {
    let base = NonNull::new(slice.as_mut_ptr()).ok_or_else(AllocError::invalid_argument)?;
    let block = BytesBlock::new(base.cast(), core::mem::size_of_val(slice));
    allocator.free(block, type_hash::<T>())
}

/// Drops `*ptr` in place, then frees its storage.
pub fn destroy_one<T: 'static>(allocator: &mut dyn Stack, ptr: NonNull<T>) -> AllocResult<()> {
    // SAFETY: caller guarantees `ptr` points to a live, initialized `T`
    // obtained from this allocator and not yet destroyed.
    unsafe { core::ptr::drop_in_place(ptr.as_ptr()) };
    free_one(allocator, ptr)
}

/// Drops every element of `slice` in place, then frees its storage.
pub fn destroy_many<T: 'static>(allocator: &mut dyn Stack, slice: &mut [T]) -> AllocResult<()> {
    // SAFETY: every element of `slice` is live and initialized.
    unsafe { core::ptr::drop_in_place(slice as *mut [T]) };
    free(allocator, slice)
}

/// Resizes a typed slice in place (base address never changes). `original`
/// must have come from this allocator; `new_n` is the new element count.
pub fn remap<T: 'static>(
    allocator: &mut dyn Stack,
    original: BytesBlock,
    new_n: usize,
) -> AllocResult<BytesBlock> {
    let new_bytes = new_n.checked_mul(core::mem::size_of::<T>()).ok_or_else(AllocError::invalid_argument)?;
    allocator.remap(original, type_hash::<T>(), new_bytes, type_hash::<T>())
}

/// Resizes a typed slice, possibly relocating it: tries [`remap`] first,
/// falling back to allocate-move-free. Elements are moved one at a time
/// (not `memcpy`'d) unless `T: Relocatable`, matching the growing list's
/// relocation contract.
pub fn realloc<T: 'static>(
    allocator: &mut dyn Stack,
    original: BytesBlock,
    old_n: usize,
    new_n: usize,
) -> AllocResult<BytesBlock> {
    if let Ok(remapped) = remap::<T>(allocator, original, new_n) {
        return Ok(remapped);
    }
    let new_block = allocator.alloc(
        new_n.checked_mul(core::mem::size_of::<T>()).ok_or_else(AllocError::invalid_argument)?,
        align_exp_of::<T>(),
        type_hash::<T>(),
    )?;
    let move_count = old_n.min(new_n);
    // SAFETY: `original` holds `old_n` live `T`s (caller's invariant) and
    // `new_block` has room for at least `move_count` of them; the regions
    // do not overlap since `new_block` is a fresh allocation.
    unsafe {
        core::ptr::copy_nonoverlapping(
            original.data().cast::<T>().as_ptr(),
            new_block.data().cast::<T>().as_ptr(),
            move_count,
        );
    }
    let old_slice_bytes = BytesBlock::new(original.data(), old_n * core::mem::size_of::<T>());
    let _ = allocator.free(old_slice_bytes, type_hash::<T>());
    Ok(new_block)
}

/// Registers a destruction callback that drops `*ptr` in place when `allocator`
/// is destroyed.
///
/// # Safety
/// `ptr` must remain valid and initialized until `allocator` is destroyed.
pub unsafe fn register_destruction_callback_with<T: 'static>(
    allocator: &mut dyn Basic,
    ptr: NonNull<T>,
) -> AllocResult<()> {
    let entry = drop_in_place_entry(ptr);
    // SAFETY: caller guarantees `ptr` stays valid and initialized until
    // `allocator`'s destruction, which is exactly when `entry.f` runs.
    unsafe { allocator.register_destruction_callback(entry.f, entry.userdata) }
}

/// Builds a `C` inside memory taken from `parent` and ties its lifetime to
/// `parent`'s: `build` receives the raw backing bytes to construct `C` in,
/// and `C`'s `Drop` runs as a destruction callback when `parent` is
/// destroyed. If `build` fails, the backing allocation leaks — a `Basic`
/// parent offers no way to give memory back. Use [`make_into_freeing`] with
/// a `Stack`-or-stronger parent to free on failure instead.
pub fn make_into<'p, C: 'static>(
    parent: &'p mut dyn Basic,
    build: impl FnOnce(&mut [u8]) -> AllocResult<C>,
) -> AllocResult<&'p mut C> {
    let block = parent.alloc(core::mem::size_of::<C>(), align_exp_of::<C>(), type_hash::<C>())?;
    // SAFETY: `block` was just allocated with room for one `C` and is
    // exclusively owned here until `build` either initializes or abandons it.
    let raw = unsafe { core::slice::from_raw_parts_mut(block.data().as_ptr(), block.len()) };
    let value = build(raw)?;
    let ptr: NonNull<C> = block.data().cast();
    // SAFETY: `ptr` points at the just-allocated, still-uninitialized `C` slot.
    unsafe { ptr.as_ptr().write(value) };
    let entry = drop_in_place_entry(ptr);
    // SAFETY: `ptr` stays valid and initialized for as long as `parent`
    // holds its backing allocation, i.e. until `parent` itself is destroyed.
    unsafe { parent.register_destruction_callback(entry.f, entry.userdata)? };
    // SAFETY: `ptr` is now initialized and uniquely borrowed for `'p`.
    Ok(unsafe { &mut *ptr.as_ptr() })
}

/// Same as [`make_into`], but frees the backing allocation back to `parent`
/// if `build` fails, since a `Stack`-or-stronger parent supports `free`.
pub fn make_into_freeing<'p, C: 'static>(
    parent: &'p mut dyn Stack,
    build: impl FnOnce(&mut [u8]) -> AllocResult<C>,
) -> AllocResult<&'p mut C> {
    let block = parent.alloc(core::mem::size_of::<C>(), align_exp_of::<C>(), type_hash::<C>())?;
    // SAFETY: see `make_into`.
    let raw = unsafe { core::slice::from_raw_parts_mut(block.data().as_ptr(), block.len()) };
    let value = match build(raw) {
        Ok(value) => value,
        Err(e) => {
            let _ = parent.free(block, type_hash::<C>());
            return Err(e);
        }
    };
    let ptr: NonNull<C> = block.data().cast();
    // SAFETY: see `make_into`.
    unsafe { ptr.as_ptr().write(value) };
    let entry = drop_in_place_entry(ptr);
    // SAFETY: see `make_into`.
    unsafe { parent.register_destruction_callback(entry.f, entry.userdata)? };
    // SAFETY: see `make_into`.
    Ok(unsafe { &mut *ptr.as_ptr() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::block::BlockAllocator;
    use crate::config::BlockConfig;

    fn make_block_allocator(blocks: usize, blocksize: usize) -> (Vec<u8>, BlockAllocator) {
        let mut buf = vec![0u8; blocks * blocksize];
        let block = BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len());
        (buf, BlockAllocator::new(block, BlockConfig::new(blocksize, 3)).unwrap())
    }

    #[test]
    fn construct_and_destroy_one() {
        let (_buf, mut allocator) = make_block_allocator(4, 32);
        let ptr = construct_one::<i64>(&mut allocator, 42).unwrap();
        // SAFETY: just constructed.
        assert_eq!(unsafe { *ptr.as_ref() }, 42);
        destroy_one(&mut allocator, ptr).unwrap();
    }

    #[test]
    fn construct_many_and_destroy() {
        let (_buf, mut allocator) = make_block_allocator(4, 32);
        let slice = construct_many::<i32>(&mut allocator, 2, |i| i as i32 * 10).unwrap();
        assert_eq!(slice, &[0, 10]);
        destroy_many(&mut allocator, slice).unwrap();
    }

    struct Counter(i32);

    impl Drop for Counter {
        fn drop(&mut self) {
            self.0 = -1;
        }
    }

    #[test]
    fn make_into_runs_drop_at_parent_destruction() {
        use core::sync::atomic::{AtomicBool, Ordering};
        static DROPPED: AtomicBool = AtomicBool::new(false);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPPED.store(true, Ordering::SeqCst);
            }
        }

        let (_buf, mut allocator) = make_block_allocator(4, 32);
        {
            let _child = make_into::<Tracked>(&mut allocator, |_buf| Ok(Tracked)).unwrap();
            assert!(!DROPPED.load(Ordering::SeqCst));
        }
        drop(allocator);
        assert!(DROPPED.load(Ordering::SeqCst));
    }

    #[test]
    fn make_into_freeing_frees_on_build_failure() {
        let (_buf, mut allocator) = make_block_allocator(4, 32);
        let before = allocator.blocks_free();
        let result = make_into_freeing::<Counter>(&mut allocator, |_buf| Err(AllocError::invalid_argument()));
        assert!(result.is_err());
        assert_eq!(allocator.blocks_free(), before);
    }
}
