//! Thin OS memory-map collaborator: reserve, commit, and unmap virtual
//! address ranges. Scoped narrowly to what the reservation allocator (§4.3)
//! needs; not a general-purpose mmap wrapper.
//!
//! Grounded on `examples/topecongiro-allocators-rs/mmap-alloc`'s raw
//! `libc`/`winapi` call shape; `nebula-system::memory` goes through the
//! `region` crate instead, which is not part of this crate's dependency set.

use crate::error::{AllocError, AllocResult};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Returns the platform page size in bytes.
        pub fn page_size() -> usize {
            // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if size <= 0 { 4096 } else { size as usize }
        }
    } else if #[cfg(windows)] {
        /// Returns the platform page size in bytes.
        pub fn page_size() -> usize {
            use core::mem::MaybeUninit;
            use winapi::um::sysinfoapi::GetSystemInfo;
            unsafe {
                let mut info = MaybeUninit::uninit();
                GetSystemInfo(info.as_mut_ptr());
                info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// A reserved (but not necessarily fully committed) virtual address range.
#[derive(Debug)]
pub struct ReservedRegion {
    pub base: *mut u8,
    pub reserved_bytes: usize,
}

/// Reserves `pages` pages of address space without committing backing
/// storage. `hint` is advisory only; the OS may place the region elsewhere.
#[cfg(unix)]
pub fn reserve(pages: usize) -> AllocResult<ReservedRegion> {
    let len = pages * page_size();
    if len == 0 {
        return Err(AllocError::invalid_argument());
    }
    // SAFETY: requesting a PROT_NONE anonymous mapping has no aliasing
    // concerns; the returned pointer is only used for later mprotect/munmap.
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(AllocError::os_err(unsafe { *libc::__errno_location() }));
    }
    Ok(ReservedRegion { base: ptr as *mut u8, reserved_bytes: len })
}

#[cfg(windows)]
pub fn reserve(pages: usize) -> AllocResult<ReservedRegion> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_RESERVE, PAGE_NOACCESS};
    let len = pages * page_size();
    if len == 0 {
        return Err(AllocError::invalid_argument());
    }
    let ptr = unsafe {
        VirtualAlloc(core::ptr::null_mut(), len, MEM_RESERVE, PAGE_NOACCESS)
    };
    if ptr.is_null() {
        return Err(AllocError::os_err(unsafe {
            winapi::um::errhandlingapi::GetLastError() as i32
        }));
    }
    Ok(ReservedRegion { base: ptr as *mut u8, reserved_bytes: len })
}

/// Commits `pages` pages starting at `base`, which must lie within a prior
/// [`reserve`] call's range and be page-aligned.
///
/// # Safety
/// `base` must point into a live reservation from [`reserve`] with at least
/// `pages * page_size()` bytes remaining in that reservation from `base`.
#[cfg(unix)]
pub unsafe fn commit(base: *mut u8, pages: usize) -> AllocResult<()> {
    let len = pages * page_size();
    // SAFETY: caller guarantees `base` lies within a live PROT_NONE
    // reservation of at least `len` bytes.
    let rc = unsafe { libc::mprotect(base as *mut _, len, libc::PROT_READ | libc::PROT_WRITE) };
    if rc != 0 {
        return Err(AllocError::os_err(unsafe { *libc::__errno_location() }));
    }
    Ok(())
}

/// # Safety
/// Same requirements as the Unix overload.
#[cfg(windows)]
pub unsafe fn commit(base: *mut u8, pages: usize) -> AllocResult<()> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, PAGE_READWRITE};
    let len = pages * page_size();
    let ptr = unsafe { VirtualAlloc(base as *mut _, len, MEM_COMMIT, PAGE_READWRITE) };
    if ptr.is_null() {
        return Err(AllocError::os_err(unsafe {
            winapi::um::errhandlingapi::GetLastError() as i32
        }));
    }
    Ok(())
}

/// Releases an entire reservation obtained from [`reserve`].
///
/// # Safety
/// `base`/`bytes` must exactly describe a live reservation; no outstanding
/// references into it may be used afterward.
#[cfg(unix)]
pub unsafe fn unmap(base: *mut u8, bytes: usize) -> AllocResult<()> {
    // SAFETY: caller guarantees `base`/`bytes` describe a live mapping.
    let rc = unsafe { libc::munmap(base as *mut _, bytes) };
    if rc != 0 {
        return Err(AllocError::os_err(unsafe { *libc::__errno_location() }));
    }
    Ok(())
}

/// # Safety
/// Same requirements as the Unix overload.
#[cfg(windows)]
pub unsafe fn unmap(base: *mut u8, _bytes: usize) -> AllocResult<()> {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;
    let rc = unsafe { VirtualFree(base as *mut _, 0, MEM_RELEASE) };
    if rc == 0 {
        return Err(AllocError::os_err(unsafe {
            winapi::um::errhandlingapi::GetLastError() as i32
        }));
    }
    Ok(())
}

/// Rounds `bytes` up to a whole number of pages.
#[inline]
pub fn pages_for(bytes: usize, pagesize: usize) -> usize {
    (bytes + pagesize - 1) / pagesize
}
