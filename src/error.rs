//! Crate-wide error type and propagation helpers.
//!
//! `AllocError` is the single error currency every fallible operation in
//! this crate returns. It follows the same shape as
//! `nebula-memory::allocator::error` (kind enum + optional caller-location
//! context) but is expressed as a `thiserror`-derived enum rather than
//! hand-rolled `Display`/`Error` impls.

use core::fmt;

/// Result alias used throughout the public API.
pub type AllocResult<T> = Result<T, AllocError>;

/// Where an error was raised, captured with `#[track_caller]`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext {
    pub location: Option<&'static core::panic::Location<'static>>,
}

impl ErrorContext {
    #[track_caller]
    #[inline]
    pub fn here() -> Self {
        Self { location: Some(core::panic::Location::caller()) }
    }

    #[inline]
    pub const fn none() -> Self {
        Self { location: None }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "at {}:{}:{}", loc.file(), loc.line(), loc.column()),
            None => write!(f, "at <unknown>"),
        }
    }
}

/// The error taxonomy every allocator operation in this crate can raise.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory ({context})")]
    OutOfMemory { context: ErrorContext },

    #[error("requested alignment exceeds this allocator's maximum ({context})")]
    AllocationTooAligned { context: ErrorContext },

    #[error("memory block is not owned by this allocator ({context})")]
    MemoryInvalid { context: ErrorContext },

    #[error("block was already freed ({context})")]
    AlreadyFreed { context: ErrorContext },

    #[error("allocator bookkeeping is corrupt ({context})")]
    Corruption { context: ErrorContext },

    #[error("type hash mismatch on free/remap ({context})")]
    InvalidType { context: ErrorContext },

    #[error("invalid argument or unsupported operation ({context})")]
    InvalidArgument { context: ErrorContext },

    #[error("operating system call failed with code {code} ({context})")]
    OsErr { code: i32, context: ErrorContext },

    #[error("result has already been released ({context})")]
    ResultReleased { context: ErrorContext },

    #[error("unknown or unexpected error ({context})")]
    Unknown { context: ErrorContext },
}

impl AllocError {
    #[track_caller]
    #[inline]
    pub fn out_of_memory() -> Self {
        Self::OutOfMemory { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn allocation_too_aligned() -> Self {
        Self::AllocationTooAligned { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn memory_invalid() -> Self {
        Self::MemoryInvalid { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn already_freed() -> Self {
        Self::AlreadyFreed { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn corruption() -> Self {
        Self::Corruption { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn invalid_type() -> Self {
        Self::InvalidType { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn invalid_argument() -> Self {
        Self::InvalidArgument { context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn os_err(code: i32) -> Self {
        Self::OsErr { code, context: ErrorContext::here() }
    }

    #[track_caller]
    #[inline]
    pub fn result_released() -> Self {
        Self::ResultReleased { context: ErrorContext::here() }
    }

    /// Logs this error at an appropriate level and returns it unchanged, for
    /// use as `thing().map_err(AllocError::logged)` at public entry points.
    #[inline]
    pub fn logged(self) -> Self {
        #[cfg(feature = "logging")]
        {
            match &self {
                AllocError::Corruption { .. } | AllocError::OsErr { .. } => {
                    tracing::error!(error = %self, "allocator operation failed");
                }
                _ => {
                    tracing::warn!(error = %self, "allocator operation failed");
                }
            }
        }
        self
    }
}
