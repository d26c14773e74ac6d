//! Lock-free single-producer single-consumer ring.
//!
//! Hands message and connection handles between the I/O workers and future
//! processing threads without taking a lock. Capacity is a power of two;
//! head and tail are untruncated 64-bit counters masked on slot access, and
//! one slot stays reserved so `full` is distinguishable from `empty`.
//!
//! Protocol: the producer writes the slot, then releases the tail; the
//! consumer acquires the tail, reads the slot, then releases the head.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct CacheAligned(AtomicU64);

struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    /// Consumer cursor. Separate cache line from `tail`.
    head: CacheAligned,
    /// Producer cursor.
    tail: CacheAligned,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "ring capacity must be a power of two >= 2"
        );
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity as u64 - 1,
            head: CacheAligned(AtomicU64::new(0)),
            tail: CacheAligned(AtomicU64::new(0)),
        }
    }

    /// Single producer only.
    fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.mask {
            return Err(item); // full, one slot reserved
        }
        unsafe {
            (*self.slots[(tail & self.mask) as usize].get()).write(item);
        }
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Single consumer only.
    fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        if head == self.tail.0.load(Ordering::Acquire) {
            return None; // empty
        }
        let item = unsafe { (*self.slots[(head & self.mask) as usize].get()).assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    fn is_empty(&self) -> bool {
        self.head.0.load(Ordering::Acquire) == self.tail.0.load(Ordering::Acquire)
    }

    /// Usable slots; one is reserved for full detection.
    fn capacity(&self) -> usize {
        self.mask as usize
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Remaining items were written but never read; drop them in place.
        let tail = *self.tail.0.get_mut();
        let mut head = *self.head.0.get_mut();
        while head != tail {
            unsafe {
                (*self.slots[(head & self.mask) as usize].get()).assume_init_drop();
            }
            head = head.wrapping_add(1);
        }
    }
}

/// Producer half of an SPSC ring. Not clonable: exactly one producer.
pub struct Producer<T> {
    ring: Arc<SpscRing<T>>,
}

/// Consumer half of an SPSC ring. Not clonable: exactly one consumer.
pub struct Consumer<T> {
    ring: Arc<SpscRing<T>>,
}

impl<T> Producer<T> {
    /// Push an item; returns it back when the ring is full.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest item; `None` when the ring is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.ring.pop()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Build a matched producer/consumer pair over one ring.
pub fn spsc_ring<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(SpscRing::new(capacity));
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_order_preserved() {
        let (mut tx, mut rx) = spsc_ring::<u64>(64);
        for i in 0..50 {
            tx.push(i).unwrap();
        }
        for i in 0..50 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn full_ring_rejects_and_returns_item() {
        let (mut tx, mut rx) = spsc_ring::<u32>(4);
        assert_eq!(tx.capacity(), 3);
        for i in 0..3 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(rx.pop(), Some(0));
        tx.push(99).unwrap();
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(99));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn empty_ring_pops_none() {
        let (_tx, mut rx) = spsc_ring::<u8>(8);
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn wraps_past_capacity_many_times() {
        let (mut tx, mut rx) = spsc_ring::<u64>(8);
        for round in 0..1000u64 {
            for i in 0..7 {
                tx.push(round * 7 + i).unwrap();
            }
            for i in 0..7 {
                assert_eq!(rx.pop(), Some(round * 7 + i));
            }
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn cross_thread_sequence_matches() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = spsc_ring::<u64>(1024);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                let mut item = i;
                loop {
                    match tx.push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        });

        let mut next = 0u64;
        while next < COUNT {
            if let Some(got) = rx.pop() {
                assert_eq!(got, next);
                next += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(rx.is_empty());
    }

    #[test]
    fn drops_unconsumed_items() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        #[derive(Debug)]
        struct Probe;
        impl Drop for Probe {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let (mut tx, rx) = spsc_ring::<Probe>(8);
        for _ in 0..5 {
            tx.push(Probe).unwrap();
        }
        drop(tx);
        drop(rx);
        assert_eq!(DROPS.load(Ordering::Relaxed), 5);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _ = spsc_ring::<u8>(6);
    }
}
