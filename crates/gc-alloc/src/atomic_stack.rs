//! Lock-free intrusive stack used to hand pages between pools.
//!
//! A Treiber stack whose head packs the top node address together with a
//! modification tag in the node's alignment bits. Every successful update
//! bumps the tag, so a `try_pop` that read a stale head (the node was
//! popped and pushed back in between) fails its CAS instead of corrupting
//! the list.
//!
//! Nodes are never freed by the stack. Whoever destroys a popped node must
//! make sure no other thread can still be inside `try_pop` on a stack that
//! node was reachable from.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

/// Number of low address bits used for the modification tag.
pub const TAG_BITS: u32 = 12;

/// Required alignment of every node pushed onto an [`AtomicStack`].
pub const NODE_ALIGN: usize = 1 << TAG_BITS;

const TAG_MASK: usize = NODE_ALIGN - 1;

/// A value that can be linked into an [`AtomicStack`].
///
/// Implementors must be aligned to at least [`NODE_ALIGN`] bytes.
pub trait StackNode: Sized {
    /// The intrusive link. Owned by the stack while the node is pushed.
    fn next_link(&self) -> &AtomicPtr<Self>;
}

/// Multi-producer, multi-consumer lock-free stack of `T` nodes.
///
/// Pop order is LIFO, but no caller may rely on it: concurrent pushes and
/// pops are unordered. Each pushed node is returned by exactly one `try_pop`.
pub struct AtomicStack<T: StackNode> {
    head: CachePadded<AtomicUsize>,
    _nodes: PhantomData<*mut T>,
}

// SAFETY: the stack only moves node addresses around; access to node
// contents is governed by the at-most-once handoff.
unsafe impl<T: StackNode> Send for AtomicStack<T> {}
unsafe impl<T: StackNode> Sync for AtomicStack<T> {}

#[inline]
fn pack<T>(node: *mut T, tag: usize) -> usize {
    node as usize | (tag & TAG_MASK)
}

#[inline]
fn unpack<T>(word: usize) -> (*mut T, usize) {
    ((word & !TAG_MASK) as *mut T, word & TAG_MASK)
}

impl<T: StackNode> AtomicStack<T> {
    /// Create an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            _nodes: PhantomData,
        }
    }

    /// Push `node`.
    ///
    /// The node must not currently be on any stack.
    pub fn push(&self, node: NonNull<T>) {
        debug_assert_eq!(
            node.as_ptr() as usize & TAG_MASK,
            0,
            "stack node {node:p} is not aligned to {NODE_ALIGN}"
        );
        self.push_chain(node, node);
    }

    /// Pop a node, or `None` if the stack is empty.
    pub fn try_pop(&self) -> Option<NonNull<T>> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack::<T>(head);
            let top = NonNull::new(top)?;
            // SAFETY: nodes stay mapped while reachable from any stack; a
            // stale read is caught by the tag check below.
            let next = unsafe { top.as_ref() }.next_link().load(Ordering::Acquire);
            match self.head.compare_exchange_weak(
                head,
                pack(next, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // SAFETY: the CAS made us the sole owner of `top`.
                    unsafe { top.as_ref() }
                        .next_link()
                        .store(ptr::null_mut(), Ordering::Relaxed);
                    return Some(top);
                }
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// `true` if no node is on the stack at the moment of the call.
    pub fn is_empty(&self) -> bool {
        unpack::<T>(self.head.load(Ordering::Acquire)).0.is_null()
    }

    /// Move every node of `other` onto this stack.
    ///
    /// Nodes pushed onto `other` concurrently may or may not be moved.
    pub fn transfer_all_from(&self, other: &Self) {
        let Some(first) = other.take_all() else {
            return;
        };
        // SAFETY: the detached chain is exclusively ours.
        let mut last = first;
        loop {
            let next = unsafe { last.as_ref() }.next_link().load(Ordering::Acquire);
            match NonNull::new(next) {
                Some(next) => last = next,
                None => break,
            }
        }
        self.push_chain(first, last);
    }

    /// Pop every node, in stack order.
    pub fn drain(&self) -> impl Iterator<Item = NonNull<T>> + '_ {
        std::iter::from_fn(move || self.try_pop())
    }

    /// Detach the whole chain, leaving the stack empty.
    fn take_all(&self) -> Option<NonNull<T>> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack::<T>(head);
            let top = NonNull::new(top)?;
            match self.head.compare_exchange_weak(
                head,
                pack(ptr::null_mut::<T>(), tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Push the already linked chain `first..=last`.
    fn push_chain(&self, first: NonNull<T>, last: NonNull<T>) {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let (top, tag) = unpack::<T>(head);
            // SAFETY: the chain is not yet published, so we own `last`.
            unsafe { last.as_ref() }.next_link().store(top, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(first.as_ptr(), tag.wrapping_add(1)),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }
    }
}

impl<T: StackNode> Default for AtomicStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StackNode> fmt::Debug for AtomicStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (top, tag) = unpack::<T>(self.head.load(Ordering::Relaxed));
        f.debug_struct("AtomicStack")
            .field("top", &top)
            .field("tag", &tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Node {
        next: AtomicPtr<Node>,
        id: usize,
    }

    impl StackNode for Node {
        fn next_link(&self) -> &AtomicPtr<Self> {
            &self.next
        }
    }

    fn nodes(n: usize) -> Vec<Box<Node>> {
        (0..n)
            .map(|id| {
                Box::new(Node {
                    next: AtomicPtr::new(ptr::null_mut()),
                    id,
                })
            })
            .collect()
    }

    fn ids(popped: impl Iterator<Item = NonNull<Node>>) -> Vec<usize> {
        popped.map(|node| unsafe { node.as_ref() }.id).collect()
    }

    #[test]
    fn test_empty_stack() {
        let stack = AtomicStack::<Node>::new();
        assert!(stack.is_empty());
        assert!(stack.try_pop().is_none());
    }

    #[test]
    fn test_push_pop_single_thread_is_lifo() {
        let mut storage = nodes(3);
        let stack = AtomicStack::new();
        for node in &mut storage {
            stack.push(NonNull::from(node.as_mut()));
        }
        assert!(!stack.is_empty());
        assert_eq!(ids(stack.drain()), vec![2, 1, 0]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_popped_node_is_unlinked() {
        let mut storage = nodes(2);
        let stack = AtomicStack::new();
        stack.push(NonNull::from(storage[0].as_mut()));
        stack.push(NonNull::from(storage[1].as_mut()));

        let top = stack.try_pop().unwrap();
        assert!(unsafe { top.as_ref() }.next.load(Ordering::Relaxed).is_null());
    }

    #[test]
    fn test_repush_after_pop() {
        let mut storage = nodes(2);
        let stack = AtomicStack::new();
        let a = NonNull::from(storage[0].as_mut());
        let b = NonNull::from(storage[1].as_mut());

        stack.push(a);
        stack.push(b);
        let popped_b = stack.try_pop().unwrap();
        let popped_a = stack.try_pop().unwrap();
        stack.push(popped_a);
        stack.push(popped_b);

        assert_eq!(ids(stack.drain()), vec![1, 0]);
    }

    #[test]
    fn test_transfer_all_from() {
        let mut storage = nodes(5);
        let (left, right) = storage.split_at_mut(2);
        let target = AtomicStack::new();
        let source = AtomicStack::new();
        for node in left {
            target.push(NonNull::from(node.as_mut()));
        }
        for node in right {
            source.push(NonNull::from(node.as_mut()));
        }

        target.transfer_all_from(&source);
        assert!(source.is_empty());

        let mut popped = ids(target.drain());
        assert_eq!(popped[..3], [4, 3, 2]);
        popped.sort_unstable();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_transfer_from_empty_is_noop() {
        let mut storage = nodes(1);
        let target = AtomicStack::new();
        target.push(NonNull::from(storage[0].as_mut()));
        target.transfer_all_from(&AtomicStack::new());
        assert_eq!(ids(target.drain()), vec![0]);
    }
}
