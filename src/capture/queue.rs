//! Packet queue between the device callback and the writer thread.
//!
//! One mutex and one condition variable guard a `VecDeque` of entries. The
//! producer side only ever holds the lock for the push itself; the consumer
//! side may wait on the condition variable for as long as it likes.
//!
//! Capacity is not bounded by the queue. Instead the queue keeps a running
//! byte count that the producer compares against the configured memory
//! ceiling, and the queue itself never discards data except in `flush()`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::packet::Packet;
use crate::errors::QueueError;

enum Entry {
    Packet(Packet),
    /// Sentinel telling the consumer no more data will arrive.
    Flush,
}

/// Result of a `get` call.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    Packet(Packet),
    /// The flush marker is at the head. It is left in place.
    Flush,
    /// Non-blocking call on an empty queue.
    Empty,
    /// `abort()` was called.
    Aborted,
}

struct QueueInner {
    entries: VecDeque<Entry>,
    total_bytes: u64,
    abort_requested: bool,
}

pub struct PacketQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    entry_overhead: u64,
}

impl PacketQueue {
    /// Creates a queue whose size counts payload bytes only.
    pub fn new() -> Self {
        Self::with_entry_overhead(0)
    }

    /// Creates a queue that also charges `entry_overhead` bytes per queued
    /// packet, for callers that want the ceiling to cover bookkeeping memory.
    pub fn with_entry_overhead(entry_overhead: u64) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                total_bytes: 0,
                abort_requested: false,
            }),
            available: Condvar::new(),
            entry_overhead,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // No critical section can leave the inner state half-updated, so a
        // poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accounted_size(&self, packet: &Packet) -> u64 {
        packet.payload_size() as u64 + self.entry_overhead
    }

    /// Appends a packet and wakes one waiting consumer.
    pub fn put(&self, packet: Packet) -> Result<(), QueueError> {
        let size = self.accounted_size(&packet);
        let mut inner = self.lock();

        inner
            .entries
            .try_reserve(1)
            .map_err(|_| QueueError::Allocation(std::mem::size_of::<Entry>()))?;
        inner.entries.push_back(Entry::Packet(packet));
        inner.total_bytes += size;

        self.available.notify_one();
        Ok(())
    }

    /// Enqueues the flush marker behind everything already queued.
    pub fn put_flush(&self) {
        let mut inner = self.lock();
        inner.entries.push_back(Entry::Flush);
        tracing::debug!(target: "capture",
            "[QUEUE] Flush marker queued behind {} entries ({} bytes)",
            inner.entries.len() - 1, inner.total_bytes);
        self.available.notify_all();
    }

    /// Removes and returns the head packet.
    ///
    /// With `block` set, waits until an entry is available. A flush marker at
    /// the head is reported but not consumed, so every later call sees it too.
    pub fn get(&self, block: bool) -> Dequeued {
        let mut inner = self.lock();

        loop {
            if inner.abort_requested {
                return Dequeued::Aborted;
            }

            if let Some(Entry::Flush) = inner.entries.front() {
                return Dequeued::Flush;
            }

            if let Some(Entry::Packet(packet)) = inner.entries.pop_front() {
                inner.total_bytes -= self.accounted_size(&packet);
                return Dequeued::Packet(packet);
            }

            if !block {
                return Dequeued::Empty;
            }

            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current accounted byte size, read under the lock.
    pub fn size(&self) -> u64 {
        self.lock().total_bytes
    }

    /// Number of queued entries, including a flush marker.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every entry, flush marker included, and resets the size.
    /// Teardown only.
    pub fn flush(&self) -> usize {
        let mut inner = self.lock();
        let discarded = inner
            .entries
            .iter()
            .filter(|entry| matches!(entry, Entry::Packet(_)))
            .count();
        inner.entries.clear();
        inner.total_bytes = 0;

        if discarded > 0 {
            tracing::debug!(target: "capture", "[QUEUE] Flushed {} queued packets", discarded);
        }
        discarded
    }

    /// Releases every waiting consumer without draining.
    pub fn abort(&self) {
        let mut inner = self.lock();
        inner.abort_requested = true;
        self.available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().abort_requested
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}
