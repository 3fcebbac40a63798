//! A composable allocator toolkit.
//!
//! Every allocator kind in [`allocators`] is consumed through one of the
//! four capability tiers in [`capability`]: [`capability::Basic`] (alloc
//! only), [`capability::Stack`] (adds free/remap), [`capability::Heap`]
//! (marker: frees need not be LIFO), and [`capability::ThreadsafeHeap`]
//! (adds a realloc safe to call concurrently). Which tiers a concrete kind
//! implements is a fixed property of that kind, enforced at compile time
//! rather than through a runtime capability check.
//!
//! [`typed`] layers a typed, type-hash-tagged API on top of the byte-level
//! capability traits. [`collections`] holds two allocator-aware intrusive
//! containers built on that typed API.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc as alloc_crate;

#[cfg(feature = "std")]
extern crate std;

pub mod allocators;
pub mod callback;
pub mod capability;
pub mod collections;
pub mod config;
pub mod error;
pub mod os;
pub mod typed;
pub mod typehash;
pub mod types;

pub use capability::{Basic, Heap, Stack, ThreadsafeHeap};
pub use error::{AllocError, AllocResult, ErrorContext};
pub use typehash::TypeHash;
pub use types::{AllocProperties, AllocRequirements, AllocatorKind, BytesBlock};

pub use allocators::{
    appending_parent, remapping_parent, BlockAllocator, GrowthParent, HeapAllocator,
    OneshotAllocator, ReservationAllocator, ScratchAllocator, StackAllocator,
};

#[cfg(feature = "std")]
pub use allocators::CHeapAllocator;
pub use collections::{GrowingList, Relocatable, SegmentedStack};
