//! Lock-Free Queues for RT / non-RT Communication
//!
//! Provides the wait-free plumbing between the audio thread and the rest of
//! the engine:
//! - `SpscFifo`: single-producer single-consumer event queue
//! - `SpinLock`: test-and-test-and-set lock for the rare multi-producer case
//! - `ContiguousReadFifo`: overwrite-on-overflow buffer with one-shot flush
//!
//! CRITICAL: the audio thread must never block. Pushing to a full queue fails
//! and returns the item, it does not wait.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

// ═══════════════════════════════════════════════════════════════════════════════
// SPSC FIFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Single-producer single-consumer queue of owned items.
///
/// Capacity is rounded up to a power of two at construction so index wrapping
/// is a mask. Producer stores with release ordering, consumer loads with
/// acquire, which is all the synchronisation moved items need.
///
/// The type itself cannot enforce the single-producer / single-consumer
/// contract since both ends go through `&self`; callers wrap the producer
/// side in a [`SpinLock`] when more than one thread pushes.
pub struct SpscFifo<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
}

// SAFETY: items are handed over between threads through the queue, so T must
// be Send. The queue itself holds no thread affinity.
unsafe impl<T: Send> Send for SpscFifo<T> {}
unsafe impl<T: Send> Sync for SpscFifo<T> {}

impl<T> SpscFifo<T> {
    /// Create a queue with at least `min_capacity` slots.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two().max(2);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Push an item. Returns it back if the queue is full.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        if write.wrapping_sub(read) > self.mask {
            return Err(item);
        }

        // SAFETY: the slot at write & mask is outside the readable window, so
        // only this (single) producer touches it. The release store below
        // publishes the write.
        unsafe {
            (*self.slots[write & self.mask].get()).write(item);
        }
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop the oldest item, if any.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        // SAFETY: read < write, so the slot holds an initialized item that
        // the producer published with release ordering. Reading it out leaves
        // the slot logically uninitialized again.
        let item = unsafe { (*self.slots[read & self.mask].get()).assume_init_read() };
        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for SpscFifo<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPINLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Test-and-test-and-set spinlock.
///
/// The relaxed read loop spins on the local cache line and only attempts the
/// exchange once the lock looks free, which causes fewer cache invalidations
/// than a bare test-and-set. Hold times must stay in the microsecond range.
pub struct SpinLock<T> {
    flag: CachePadded<AtomicBool>,
    value: UnsafeCell<T>,
}

// SAFETY: the lock grants exclusive access to the inner value, one thread at
// a time, so Send on T is sufficient for both.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            flag: CachePadded::new(AtomicBool::new(false)),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            while self.flag.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
            if !self.flag.swap(true, Ordering::Acquire) {
                return SpinLockGuard { lock: self };
            }
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> std::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> std::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.flag.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTIGUOUS READ FIFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Circular buffer whose only read operation flushes everything as one
/// contiguous slice.
///
/// Overwrites the oldest items on overflow and signals the producer through
/// the push return value. Not thread-safe; used where producer and consumer
/// run on the same thread but a downstream API wants a plain slice.
pub struct ContiguousReadFifo<T> {
    data: Box<[T]>,
    size: usize,
    write_idx: usize,
    limit_reached: bool,
}

impl<T: Copy + Default> ContiguousReadFifo<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity].into_boxed_slice(),
            size: 0,
            write_idx: 0,
            limit_reached: false,
        }
    }

    /// Push an item. Returns false if the push overwrote unread data.
    pub fn push(&mut self, item: T) -> bool {
        let ok = !self.limit_reached;
        self.data[self.write_idx] = item;
        self.write_idx += 1;
        if !self.limit_reached {
            self.size += 1;
        }
        if self.write_idx == self.data.len() {
            self.write_idx = 0;
            self.limit_reached = true;
        }
        ok
    }

    /// Return everything pushed so far and reset the buffer. All returned
    /// items must be consumed before the next `push`.
    pub fn flush(&mut self) -> &[T] {
        let size = self.size;
        self.size = 0;
        self.write_idx = 0;
        self.limit_reached = false;
        &self.data[..size]
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_push_pop_order() {
        let fifo = SpscFifo::new(16);
        for i in 0..10 {
            assert!(fifo.push(i).is_ok());
        }
        assert_eq!(fifo.len(), 10);
        for i in 0..10 {
            assert_eq!(fifo.pop(), Some(i));
        }
        assert!(fifo.pop().is_none());
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fifo_capacity_limit() {
        let fifo = SpscFifo::new(8);
        for i in 0..8 {
            assert!(fifo.push(i).is_ok(), "push {} should succeed", i);
        }
        // One past capacity fails and hands the item back
        assert_eq!(fifo.push(99), Err(99));

        fifo.pop();
        assert!(fifo.push(8).is_ok());
    }

    #[test]
    fn test_fifo_drops_remaining_items() {
        let item = Arc::new(());
        {
            let fifo = SpscFifo::new(4);
            fifo.push(Arc::clone(&item)).unwrap();
            fifo.push(Arc::clone(&item)).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_fifo_spsc_stress() {
        const COUNT: usize = 100_000;
        let fifo = Arc::new(SpscFifo::new(128));

        let producer = {
            let fifo = Arc::clone(&fifo);
            std::thread::spawn(move || {
                let mut next = 0usize;
                while next < COUNT {
                    if fifo.push(next).is_ok() {
                        next += 1;
                    }
                }
            })
        };

        let mut expected = 0usize;
        while expected < COUNT {
            if let Some(value) = fifo.pop() {
                assert_eq!(value, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_spinlock_exclusion() {
        let lock = Arc::new(SpinLock::new(0u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn test_contiguous_fifo_flush() {
        let mut fifo = ContiguousReadFifo::new(4);
        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert_eq!(fifo.flush(), &[1, 2]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_contiguous_fifo_overflow() {
        let mut fifo = ContiguousReadFifo::new(3);
        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert!(fifo.push(3));
        // Buffer wrapped, next push signals overflow and overwrites
        assert!(!fifo.push(4));
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.flush(), &[4, 2, 3]);
        // Flush resets overflow state
        assert!(fifo.push(5));
        assert_eq!(fifo.flush(), &[5]);
    }
}
