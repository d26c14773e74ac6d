//! Pre-allocated send and receive record pools.
//!
//! Each direction is a fixed ring of cache-line-aligned `Message` slots
//! claimed by a monotonically increasing counter modulo capacity. Slot
//! ownership is transient: a claimed slot is valid until `capacity` further
//! claims occur on the same ring, at which point the counter wraps back onto
//! it. No slot memory is freed during the server lifetime.
//!
//! # Invariant
//!
//! The number of concurrently in-flight slots per ring must never exceed
//! its capacity. The workers hold at most a handful of slots each (one
//! receive record plus the acks composed while servicing it), so the
//! baseline capacity of 1024 per direction leaves orders of magnitude of
//! headroom; `config` checks the worst case at compile time.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use zerocopy::FromZeroes;

use crate::wire::Message;

#[repr(align(64))]
struct RecordSlot(UnsafeCell<Message>);

/// One direction's ring of records.
struct RecordRing {
    slots: Box<[RecordSlot]>,
    cursor: AtomicUsize,
}

unsafe impl Sync for RecordRing {}

impl RecordRing {
    fn new(capacity: usize) -> Self {
        // Zero-initialising every slot also faults the pages in upfront, so
        // first use on the hot path never takes a page fault.
        let slots = (0..capacity)
            .map(|_| RecordSlot(UnsafeCell::new(Message::new_zeroed())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next slot. Distinct concurrent callers get distinct slots
    /// as long as the in-flight window stays within capacity; the returned
    /// reference must not be held across more than `capacity` further
    /// claims on this ring.
    #[allow(clippy::mut_from_ref)]
    fn claim(&self) -> &mut Message {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        unsafe { &mut *self.slots[index].0.get() }
    }
}

/// The server's pre-allocated send and receive record rings.
pub struct BufferPool {
    send: RecordRing,
    recv: RecordRing,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be non-zero");
        Self {
            send: RecordRing::new(capacity),
            recv: RecordRing::new(capacity),
        }
    }

    /// Next slot for composing an outbound record.
    #[allow(clippy::mut_from_ref)]
    pub fn next_send_buffer(&self) -> &mut Message {
        self.send.claim()
    }

    /// Next slot for receiving an inbound record.
    #[allow(clippy::mut_from_ref)]
    pub fn next_recv_buffer(&self) -> &mut Message {
        self.recv.claim()
    }

    /// Slots per direction.
    pub fn capacity(&self) -> usize {
        self.send.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequential_claims_cycle_through_all_slots() {
        let pool = BufferPool::new(8);
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let msg = pool.next_send_buffer() as *mut Message;
            assert!(seen.insert(msg), "slot reused inside one window");
        }
        // Ninth claim wraps back onto the first slot.
        let again = pool.next_send_buffer() as *mut Message;
        assert!(seen.contains(&again));
    }

    #[test]
    fn send_and_recv_rings_are_independent() {
        let pool = BufferPool::new(4);
        let send = pool.next_send_buffer() as *mut Message;
        let recv = pool.next_recv_buffer() as *mut Message;
        assert_ne!(send, recv);
    }

    #[test]
    fn claimed_slot_holds_written_record() {
        use crate::wire::MessageType;

        let pool = BufferPool::new(4);
        let msg = pool.next_send_buffer();
        msg.message_id = 42;
        msg.message_type = MessageType::Heartbeat as u8;

        // Claims on other slots do not disturb it.
        for _ in 0..3 {
            pool.next_send_buffer().message_id = 0;
        }
        assert_eq!(msg.message_id, 42);
    }

    #[test]
    fn slots_are_cache_line_aligned() {
        let pool = BufferPool::new(4);
        for _ in 0..4 {
            let addr = pool.next_recv_buffer() as *mut Message as usize;
            assert_eq!(addr % 64, 0);
        }
    }

    #[test]
    fn concurrent_claims_within_window_are_distinct() {
        use std::sync::Arc;

        let pool = Arc::new(BufferPool::new(1024));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                (0..64)
                    .map(|_| pool.next_recv_buffer() as *mut Message as usize)
                    .collect::<Vec<_>>()
            }));
        }
        let mut all = HashSet::new();
        for h in handles {
            for addr in h.join().unwrap() {
                assert!(all.insert(addr), "two claims in one window shared a slot");
            }
        }
        assert_eq!(all.len(), 256);
    }
}
