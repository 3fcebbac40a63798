//! The seven concrete allocator kinds. Each implements [`crate::capability::Basic`]
//! plus whatever subset of `Stack`/`Heap`/`ThreadsafeHeap` its backing storage
//! scheme can actually support.

pub mod block;
pub mod heap;
pub mod oneshot;
pub mod reservation;
pub mod scratch;
pub mod stack;

#[cfg(feature = "std")]
pub mod c_heap;

pub use block::BlockAllocator;
pub use heap::{appending_parent, remapping_parent, GrowthParent, HeapAllocator};

#[cfg(feature = "std")]
pub use c_heap::CHeapAllocator;
pub use oneshot::OneshotAllocator;
pub use reservation::ReservationAllocator;
pub use scratch::ScratchAllocator;
pub use stack::StackAllocator;
