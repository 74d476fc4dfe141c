//! Bounded MPSC ring buffer for pending log entries.
//!
//! Capacity is rounded up to a power of two so slot indices reduce to a mask
//! of the monotonic head/tail counters. Producers resolve a full ring through
//! an [`OverflowPolicy`]; the single consumer drains batches. Head and tail
//! are mirrored in atomics so size and statistics reads never take the lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{LogError, Result};

/// Behavior when a push finds the ring full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest entry and store the new one.
    DropOldest,
    /// Reject the new entry; the caller counts it as dropped.
    DropNewest,
    /// Park the producer until a slot opens or the buffer shuts down.
    Block,
    /// Double the capacity up to a ceiling, then behave like `DropOldest`.
    Expand,
}

/// Outcome of a push, after the overflow policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without evicting anything.
    Stored,
    /// Stored after evicting the oldest entry (one entry lost).
    StoredEvictedOldest,
    /// Rejected under `DropNewest` (the new entry is lost).
    Rejected,
    /// The buffer is shutting down; the entry was not stored.
    Shutdown,
}

struct RingInner<T> {
    slots: Vec<Option<T>>,
    mask: u64,
    head: u64,
    tail: u64,
}

impl<T> RingInner<T> {
    fn size(&self) -> u64 {
        self.tail.wrapping_sub(self.head)
    }

    fn store(&mut self, item: T) {
        let idx = (self.tail & self.mask) as usize;
        self.slots[idx] = Some(item);
        self.tail = self.tail.wrapping_add(1);
    }

    fn take_head(&mut self) -> Option<T> {
        if self.size() == 0 {
            return None;
        }
        let idx = (self.head & self.mask) as usize;
        let item = self.slots[idx].take();
        self.head = self.head.wrapping_add(1);
        item
    }

    fn grow_to(&mut self, new_capacity: usize) {
        let new_mask = new_capacity as u64 - 1;
        let mut slots: Vec<Option<T>> = Vec::with_capacity(new_capacity);
        slots.resize_with(new_capacity, || None);
        let mut i = self.head;
        while i != self.tail {
            let old_idx = (i & self.mask) as usize;
            let new_idx = (i & new_mask) as usize;
            slots[new_idx] = self.slots[old_idx].take();
            i = i.wrapping_add(1);
        }
        self.slots = slots;
        self.mask = new_mask;
    }
}

/// A bounded FIFO of queued entries with a configurable overflow policy.
pub struct RingBuffer<T> {
    inner: Mutex<RingInner<T>>,
    not_full: Condvar,
    head: AtomicU64,
    tail: AtomicU64,
    policy: OverflowPolicy,
    expand_ceiling: usize,
    shutting_down: AtomicBool,
}

impl<T> RingBuffer<T> {
    /// Creates a ring with the given capacity (rounded up to a power of two)
    /// and overflow policy. Zero capacity is a configuration error.
    pub fn new(
        capacity: usize,
        policy: OverflowPolicy,
        expand_ceiling: Option<usize>,
    ) -> Result<RingBuffer<T>> {
        if capacity == 0 {
            return Err(LogError::Configuration(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        let capacity = capacity.next_power_of_two();
        let ceiling = expand_ceiling
            .map(|c| c.next_power_of_two())
            .unwrap_or(capacity)
            .max(capacity);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(RingBuffer {
            inner: Mutex::new(RingInner {
                slots,
                mask: capacity as u64 - 1,
                head: 0,
                tail: 0,
            }),
            not_full: Condvar::new(),
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            policy,
            expand_ceiling: ceiling,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Current number of queued entries; lock-free.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity (may have grown under `Expand`).
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Pushes one entry, resolving a full ring through the overflow policy.
    pub fn push(&self, item: T) -> PushOutcome {
        if self.shutting_down.load(Ordering::Acquire) {
            return PushOutcome::Shutdown;
        }
        let mut inner = self.inner.lock();
        loop {
            if inner.size() < inner.slots.len() as u64 {
                inner.store(item);
                self.tail.store(inner.tail, Ordering::Release);
                return PushOutcome::Stored;
            }
            match self.policy {
                OverflowPolicy::DropOldest => {
                    let _ = inner.take_head();
                    inner.store(item);
                    self.head.store(inner.head, Ordering::Release);
                    self.tail.store(inner.tail, Ordering::Release);
                    return PushOutcome::StoredEvictedOldest;
                }
                OverflowPolicy::DropNewest => return PushOutcome::Rejected,
                OverflowPolicy::Block => {
                    self.not_full.wait(&mut inner);
                    if self.shutting_down.load(Ordering::Acquire) {
                        return PushOutcome::Shutdown;
                    }
                    // Re-check for a free slot.
                }
                OverflowPolicy::Expand => {
                    let current = inner.slots.len();
                    if current < self.expand_ceiling {
                        let next = (current * 2).min(self.expand_ceiling);
                        inner.grow_to(next);
                        // Loop stores into the grown ring.
                    } else {
                        let _ = inner.take_head();
                        inner.store(item);
                        self.head.store(inner.head, Ordering::Release);
                        self.tail.store(inner.tail, Ordering::Release);
                        return PushOutcome::StoredEvictedOldest;
                    }
                }
            }
        }
    }

    /// Pops the oldest entry, if any.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.take_head();
        if item.is_some() {
            self.head.store(inner.head, Ordering::Release);
            self.not_full.notify_one();
        }
        item
    }

    /// Drains up to `max` entries into `out`, preserving FIFO order.
    /// Returns the number drained.
    pub fn pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut n = 0;
        while n < max {
            match inner.take_head() {
                Some(item) => {
                    out.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        if n > 0 {
            self.head.store(inner.head, Ordering::Release);
            self.not_full.notify_all();
        }
        n
    }

    /// Marks the buffer as shutting down and wakes blocked producers.
    /// Queued entries remain drainable.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let _guard = self.inner.lock();
        self.not_full.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(RingBuffer::<u32>::new(0, OverflowPolicy::DropNewest, None).is_err());
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring = RingBuffer::<u32>::new(10, OverflowPolicy::DropNewest, None).unwrap();
        assert_eq!(ring.capacity(), 16);
    }

    #[test]
    fn test_fifo_order() {
        let ring = RingBuffer::new(4, OverflowPolicy::DropNewest, None).unwrap();
        for i in 0..4 {
            assert_eq!(ring.push(i), PushOutcome::Stored);
        }
        for i in 0..4 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_size_accounting() {
        let ring = RingBuffer::new(8, OverflowPolicy::DropNewest, None).unwrap();
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 5);
        ring.pop();
        ring.pop();
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_drop_newest_rejects_when_full() {
        let ring = RingBuffer::new(2, OverflowPolicy::DropNewest, None).unwrap();
        assert_eq!(ring.push(1), PushOutcome::Stored);
        assert_eq!(ring.push(2), PushOutcome::Stored);
        assert_eq!(ring.push(3), PushOutcome::Rejected);
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn test_drop_oldest_evicts_only_oldest() {
        let ring = RingBuffer::new(4, OverflowPolicy::DropOldest, None).unwrap();
        let mut evicted = 0;
        for i in 0..100u32 {
            if ring.push(i) == PushOutcome::StoredEvictedOldest {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 96);
        // The four newest pushes survive, in order.
        assert_eq!(ring.pop(), Some(96));
        assert_eq!(ring.pop(), Some(97));
        assert_eq!(ring.pop(), Some(98));
        assert_eq!(ring.pop(), Some(99));
    }

    #[test]
    fn test_expand_grows_to_ceiling_then_evicts() {
        let ring = RingBuffer::new(2, OverflowPolicy::Expand, Some(8)).unwrap();
        for i in 0..8u32 {
            assert_ne!(ring.push(i), PushOutcome::Rejected);
        }
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.len(), 8);
        // Ceiling reached: further pushes evict the oldest.
        assert_eq!(ring.push(8), PushOutcome::StoredEvictedOldest);
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn test_pop_batch_preserves_order() {
        let ring = RingBuffer::new(8, OverflowPolicy::DropNewest, None).unwrap();
        for i in 0..6 {
            ring.push(i);
        }
        let mut out = Vec::new();
        assert_eq!(ring.pop_batch(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_block_policy_unblocks_on_pop() {
        let ring = Arc::new(RingBuffer::new(1, OverflowPolicy::Block, None).unwrap());
        ring.push(1u32);
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || ring.push(2))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(producer.join().unwrap(), PushOutcome::Stored);
        assert_eq!(ring.pop(), Some(2));
    }

    #[test]
    fn test_block_policy_unblocks_on_shutdown() {
        let ring = Arc::new(RingBuffer::new(1, OverflowPolicy::Block, None).unwrap());
        ring.push(1u32);
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || ring.push(2))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        ring.shutdown();
        assert_eq!(producer.join().unwrap(), PushOutcome::Shutdown);
        // Queued entries stay drainable after shutdown.
        assert_eq!(ring.pop(), Some(1));
    }

    #[test]
    fn test_concurrent_producers_account_for_every_push() {
        let ring = Arc::new(RingBuffer::new(64, OverflowPolicy::DropNewest, None).unwrap());
        let mut handles = Vec::new();
        for t in 0..4 {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                let mut stored = 0u32;
                for i in 0..100u32 {
                    if ring.push(t * 1000 + i) == PushOutcome::Stored {
                        stored += 1;
                    }
                }
                stored
            }));
        }
        let stored: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(ring.len() as u32, stored.min(64));
        // stored pushes + rejected pushes == total pushes
        assert!(stored <= 400);
    }
}
