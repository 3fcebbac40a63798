//! Virtual-memory reservation allocator: reserves a large address range up
//! front and commits pages into it on demand via `remap`, so a growing
//! buffer never moves.
//!
//! Grounded on
//! `examples/original_source/include/allo/impl/reservation_allocator.h`;
//! the underlying OS calls are in [`crate::os`].

use core::ptr::NonNull;

use crate::capability::Basic;
use crate::config::ReservationConfig;
use crate::error::{AllocError, AllocResult};
use crate::os;
use crate::typehash::TypeHash;
use crate::types::{AllocProperties, AllocatorKind, BytesBlock};

pub struct ReservationAllocator {
    base: NonNull<u8>,
    pagesize: usize,
    committed_pages: usize,
    reserved_pages: usize,
}

impl ReservationAllocator {
    /// Reserves `config.committed_pages + config.additional_pages_reserved`
    /// pages and commits the first `config.committed_pages`.
    pub fn new(config: ReservationConfig) -> AllocResult<Self> {
        let pagesize = os::page_size();
        let total_pages = config.committed_pages + config.additional_pages_reserved;
        if total_pages == 0 {
            return Err(AllocError::invalid_argument());
        }
        let region = os::reserve(total_pages)?;
        let base = NonNull::new(region.base).ok_or_else(AllocError::out_of_memory)?;
        if config.committed_pages > 0 {
            // SAFETY: `base` is the start of the just-reserved region, and
            // `committed_pages <= total_pages`.
            unsafe { os::commit(region.base, config.committed_pages)? };
        }
        Ok(Self { base, pagesize, committed_pages: config.committed_pages, reserved_pages: total_pages })
    }

    /// The currently committed prefix of the reservation.
    pub fn current_memory(&self) -> BytesBlock {
        BytesBlock::new(self.base, self.committed_pages * self.pagesize)
    }

    fn committed_bytes(&self) -> usize {
        self.committed_pages * self.pagesize
    }
}

impl Basic for ReservationAllocator {
    fn alloc(&mut self, _size: usize, _align_exp: u32, _typehash: TypeHash) -> AllocResult<BytesBlock> {
        Err(AllocError::out_of_memory())
    }

    fn properties(&self) -> AllocProperties {
        AllocProperties {
            max_contiguous_bytes: self.reserved_pages * self.pagesize,
            max_alignment: self.pagesize,
        }
    }

    unsafe fn register_destruction_callback(
        &mut self,
        _f: unsafe fn(*mut u8),
        _userdata: *mut u8,
    ) -> AllocResult<()> {
        Err(AllocError::invalid_argument())
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Reservation
    }
}

impl ReservationAllocator {
    /// Grows the committed region in place to at least `new_size` bytes,
    /// capped by the total reservation. The base address never changes.
    pub fn remap(&mut self, block: BytesBlock, new_size: usize) -> AllocResult<BytesBlock> {
        if block.data() != self.base {
            return Err(AllocError::memory_invalid());
        }
        if new_size <= self.committed_bytes() {
            return Ok(BytesBlock::new(self.base, new_size));
        }
        let needed_pages = os::pages_for(new_size, self.pagesize);
        if needed_pages > self.reserved_pages {
            return Err(AllocError::out_of_memory());
        }
        let additional = needed_pages - self.committed_pages;
        // SAFETY: `self.base + committed_pages*pagesize` lies within the
        // live reservation with `additional` pages remaining.
        unsafe {
            let grow_base = self.base.as_ptr().add(self.committed_bytes());
            os::commit(grow_base, additional)?;
        }
        self.committed_pages = needed_pages;
        Ok(self.current_memory())
    }

    pub fn free(&mut self, block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        if block.data() != self.base {
            return Err(AllocError::memory_invalid());
        }
        Ok(())
    }

    pub fn free_status(&self, block: BytesBlock, _typehash: TypeHash) -> AllocResult<()> {
        if block.data() != self.base {
            return Err(AllocError::memory_invalid());
        }
        Ok(())
    }
}

impl Drop for ReservationAllocator {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`reserved_pages*pagesize` exactly describe the
        // reservation created in `new`, and no allocation outlives it.
        unsafe {
            let _ = os::unmap(self.base.as_ptr(), self.reserved_pages * self.pagesize);
        }
    }
}
