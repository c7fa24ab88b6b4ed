//! [`Queue`]: the bounded SPSC ring buffer the internal pipeline state
//! needs between its producer and consumer halves.
//!
//! Generalized from a const-generic ring-buffer/slot pair to a
//! *runtime*-sized buffer, since `prefetch` is a pipeline configuration
//! value, not known at compile time. The backing allocation is rounded up
//! to the next power of two for mask-based indexing, but the fullness
//! check (`offer` rejects when full) is against the logical `capacity` the
//! caller asked for, never the rounded allocation - so the queue never
//! holds more than `capacity` items concurrently, even though it may
//! allocate a few unused trailing slots.
//!
//! Synchronization follows the same discipline throughout: the producer's
//! cursor is read with `Relaxed` (only the producer writes it) and the
//! consumer's cursor with `Acquire` (to observe the consumer's prior
//! reads), and vice versa, with `CachePadded` cursors to avoid false
//! sharing.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Queue<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    capacity: usize,
    /// Consumer's cursor - only written by the single consumer.
    head: CachePadded<AtomicUsize>,
    /// Producer's cursor - only written by the single producer.
    tail: CachePadded<AtomicUsize>,
}

// Safety: `Queue` is used strictly as an SPSC structure; the Acquire/Release
// pairing on `head`/`tail` hands off ownership of each slot's buffer cell
// between the one producer and the one consumer.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Builds a queue holding at most `capacity` items. Panics if `capacity`
    /// is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Queue capacity must be positive");
        let alloc = capacity.next_power_of_two();
        let buf: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..alloc)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buf,
            mask: alloc - 1,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn index(&self, seq: usize) -> usize {
        seq & self.mask
    }

    /// Pushes `value`, returning it back if the queue is at `capacity`.
    ///
    /// Must only be called by the single producer.
    pub(crate) fn offer(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.capacity {
            return Err(value);
        }

        let i = self.index(tail);
        // Safety: slot `i` was either never written or already drained by
        // the consumer (tail - head < capacity), so it's free to write.
        unsafe { (*self.buf[i].get()).write(value) };

        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the oldest item, or `None` if the queue is empty.
    ///
    /// Must only be called by the single consumer.
    pub(crate) fn poll(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let i = self.index(head);
        // Safety: slot `i` was written by the producer (head != tail) and
        // not yet read.
        let value = unsafe { (*self.buf[i].get()).assume_init_read() };

        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Drains and drops every buffered item. Must only be called by the
    /// single consumer (used on cancellation/teardown).
    pub(crate) fn clear(&self) {
        while self.poll().is_some() {}
    }

    /// Approximate occupancy; exact if called by either sole-owner thread
    /// with no concurrent producer/consumer activity in flight.
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let count = tail.wrapping_sub(head);
        for s in 0..count {
            let i = self.index(head.wrapping_add(s));
            // Safety: these slots were written by the producer and never
            // read, so they hold live values that need dropping.
            unsafe { ptr::drop_in_place((*self.buf[i].get()).as_mut_ptr()) };
        }
    }
}
