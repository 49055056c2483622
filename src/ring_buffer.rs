//! Fixed-capacity lock-free single-producer/single-consumer queue.
//!
//! The buffer is handed out already split into a [`Producer`] and a [`Consumer`]
//! half, so the one-writer-per-index discipline is carried by ownership rather
//! than checked at runtime. One slot is always kept free to tell "full" from
//! "empty", so a buffer of capacity `N` holds at most `N - 1` items.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be a power of two >= 2, got {0}")]
    InvalidCapacity(usize),
}

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    // Written only by the producer.
    head: AtomicUsize,
    // Written only by the consumer.
    tail: AtomicUsize,
}

// Each slot is accessed by exactly one side at a time: the producer owns
// [head, tail-1) and the consumer owns [tail, head), with ownership handed
// over through the release/acquire pairs on the indices.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn occupied(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        h.wrapping_sub(t) & self.mask
    }
}

pub struct RingBuffer;

impl RingBuffer {
    /// Allocates a queue with `capacity` slots and returns its two halves.
    pub fn with_capacity<T: Copy + Default + Send>(
        capacity: usize,
    ) -> Result<(Producer<T>, Consumer<T>), RingBufferError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingBufferError::InvalidCapacity(capacity));
        }
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        });
        Ok((
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        ))
    }
}

pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Producer<T> {
    /// Appends `item`, handing it back when the queue is full.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        let s = &*self.shared;
        let h = s.head.load(Ordering::Relaxed);
        let next = (h + 1) & s.mask;
        if next == s.tail.load(Ordering::Acquire) {
            return Err(item);
        }
        // SAFETY: slot `h` is outside [tail, head) so the consumer cannot be reading it.
        unsafe {
            *s.slots[h].get() = item;
        }
        s.head.store(next, Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Advisory only: the consumer may be popping concurrently.
    pub fn len(&self) -> usize {
        self.shared.occupied()
    }

    pub fn is_full(&self) -> bool {
        self.len() + 1 == self.capacity()
    }
}

pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Consumer<T> {
    pub fn try_pop(&mut self) -> Option<T> {
        let s = &*self.shared;
        let t = s.tail.load(Ordering::Relaxed);
        if t == s.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: slot `t` is inside [tail, head), published by the producer's release store.
        let item = unsafe { *s.slots[t].get() };
        s.tail.store((t + 1) & s.mask, Ordering::Release);
        Some(item)
    }

    /// Pops exactly `out.len()` items, or nothing at all when fewer are queued.
    ///
    /// Only the producer can change the count concurrently and it can only
    /// grow it, so the availability check cannot be invalidated before the copy.
    pub fn pop_exact(&mut self, out: &mut [T]) -> bool {
        let s = &*self.shared;
        let t = s.tail.load(Ordering::Relaxed);
        let h = s.head.load(Ordering::Acquire);
        let available = h.wrapping_sub(t) & s.mask;
        if available < out.len() {
            return false;
        }
        for (i, dst) in out.iter_mut().enumerate() {
            // SAFETY: every index in [t, t + out.len()) lies inside [tail, head).
            *dst = unsafe { *s.slots[(t + i) & s.mask].get() };
        }
        s.tail.store((t + out.len()) & s.mask, Ordering::Release);
        true
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Advisory only: the producer may be pushing concurrently.
    pub fn len(&self) -> usize {
        self.shared.occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
