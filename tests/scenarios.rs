use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloctk::allocators::block::BlockAllocator;
use alloctk::allocators::heap::HeapAllocator;
use alloctk::allocators::reservation::ReservationAllocator;
use alloctk::allocators::stack::StackAllocator;
use alloctk::config::{BlockConfig, HeapConfig, ReservationConfig, StackConfig};
use alloctk::typed::{self, construct_one};
use alloctk::{AllocError, Basic, BytesBlock, Stack, TypeHash};

fn block_of(buf: &mut [u8]) -> BytesBlock {
    BytesBlock::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len())
}

#[test]
fn s1_block_allocator_exhaust_reuse_and_callback() {
    static FIRED: AtomicUsize = AtomicUsize::new(0);
    unsafe fn bump(_: *mut u8) {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    let mut buf = vec![0u8; 4 * 32];
    let mut allocator = BlockAllocator::new(block_of(&mut buf), BlockConfig::new(32, 3)).unwrap();

    let a = construct_one::<i32>(&mut allocator, 1).unwrap();
    let b = construct_one::<i32>(&mut allocator, 2).unwrap();
    let c = construct_one::<i32>(&mut allocator, 3).unwrap();
    let _d = construct_one::<i32>(&mut allocator, 4).unwrap();
    assert!(matches!(
        allocator.alloc(32, 2, TypeHash::UNTYPED),
        Err(AllocError::OutOfMemory { .. })
    ));

    typed::free_one(&mut allocator, c).unwrap();
    let reused = construct_one::<i32>(&mut allocator, 30).unwrap();
    assert_eq!(reused.as_ptr(), c.as_ptr());

    typed::free_one(&mut allocator, a).unwrap();
    typed::free_one(&mut allocator, b).unwrap();
    typed::free_one(&mut allocator, reused).unwrap();

    unsafe {
        allocator.register_destruction_callback(bump, core::ptr::null_mut()).unwrap();
    }
    drop(allocator);
    assert_eq!(FIRED.load(Ordering::SeqCst), 1);
}

#[test]
fn s2_stack_allocator_exact_fit_then_oom() {
    let mut buf = vec![0u8; 512];
    let mut allocator = StackAllocator::new(block_of(&mut buf), StackConfig::default()).unwrap();
    let buffer_base = buf.as_ptr() as usize;

    let first = allocator.alloc(496, 0, TypeHash::UNTYPED).unwrap();
    assert!(first.start_addr() >= buffer_base);

    allocator.free(first, TypeHash::UNTYPED).unwrap();
    let second = allocator.alloc(512, 0, TypeHash::UNTYPED);
    assert!(second.is_err());
}

#[test]
fn s3_heap_allocator_linked_list_of_strings() {
    struct Node {
        chars: NonNull<u8>,
        len: usize,
        next: Option<NonNull<Node>>,
    }

    let mut buf = vec![0u8; 2776];
    let mut heap = HeapAllocator::new(block_of(&mut buf), HeapConfig::default()).unwrap();

    let words = ["hello", "what?", "the seventh son of the seventh son", "123456789"];
    let mut head: Option<NonNull<Node>> = None;
    let mut addresses = std::collections::HashSet::new();

    for word in words.iter().rev() {
        let chars = typed::alloc::<u8>(&mut heap, word.len()).unwrap();
        for (slot, byte) in chars.iter_mut().zip(word.bytes()) {
            slot.write(byte);
        }
        let chars_ptr = NonNull::new(chars.as_mut_ptr() as *mut u8).unwrap();
        assert!(addresses.insert(chars_ptr.as_ptr() as usize));

        let node = construct_one(&mut heap, Node { chars: chars_ptr, len: word.len(), next: head }).unwrap();
        assert!(addresses.insert(node.as_ptr() as usize));
        head = Some(node);
    }

    let mut cursor = head;
    let mut collected = Vec::new();
    while let Some(n) = cursor {
        // SAFETY: every node in this list was constructed above, is live,
        // and its `chars` buffer was fully initialized before the node was.
        let node = unsafe { n.as_ref() };
        let text = unsafe { core::slice::from_raw_parts(node.chars.as_ptr(), node.len) };
        collected.push(std::str::from_utf8(text).unwrap().to_string());
        cursor = node.next;
    }
    assert_eq!(collected, words);
}

#[test]
fn s4_reservation_parent_grows_committed_region_in_place() {
    // The reservation allocator sits at the Basic tier only (it cannot
    // enforce LIFO or arbitrary-order frees the way `Stack` implies), so it
    // cannot itself stand in as a heap allocator's `Remapping` parent, which
    // requires `Stack`. Code that wants heap-over-reservation growth holds
    // the reservation allocator directly and grows it with its own inherent
    // `remap`, exercised here for a heap-sized backing buffer.
    let mut reservation = ReservationAllocator::new(ReservationConfig::new(1, 999)).unwrap();
    let first = reservation.current_memory();
    let base = first.data();
    let pagesize = first.len();

    let grown = reservation.remap(first, pagesize * 999).unwrap();
    assert_eq!(grown.data(), base);
    assert!(grown.len() >= pagesize * 999);
}

#[test]
fn s5_growing_list_append_and_remove() {
    use alloctk::collections::growing_list::GrowingList;

    let mut buf = vec![0u8; 4096];
    let mut heap = HeapAllocator::new(block_of(&mut buf), HeapConfig::default()).unwrap();
    let mut list: GrowingList<i32> = GrowingList::make_owning(&mut heap, 2).unwrap();

    list.try_append(0).unwrap();
    list.try_append(1).unwrap();
    list.try_append(2).unwrap();
    list.try_append(3).unwrap();
    assert!(list.capacity() > 2);
    assert_eq!(list.items(), &[0, 1, 2, 3]);

    list.try_remove_at(1).unwrap();
    assert_eq!(list.items(), &[0, 2, 3]);
}

#[test]
fn s6_segmented_stack_push_pop_order() {
    use alloctk::allocators::CHeapAllocator;
    use alloctk::collections::segmented_stack::SegmentedStack;

    let mut c_heap = CHeapAllocator::new();
    let mut stack: SegmentedStack<i32> = SegmentedStack::new();
    let values = [1, 2, 3, 4, 345, 64556, 23, 23423, 8989, 9089234, 1234];
    for v in values {
        stack.push(v, &mut c_heap).unwrap();
    }
    assert_eq!(stack.size(), 11);

    let mut forward = Vec::new();
    stack.for_each(|v| forward.push(*v));
    assert_eq!(forward, values);

    let mut reversed = Vec::new();
    for _ in 0..values.len() {
        reversed.push(*stack.end().unwrap());
        stack.pop();
    }
    let mut expected = values.to_vec();
    expected.reverse();
    assert_eq!(reversed, expected);
    assert!(stack.end().is_none());
}
