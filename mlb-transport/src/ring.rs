//! Fixed-capacity receive ring between the completion interrupt (producer)
//! and the reading task (consumer).
//!
//! The ring is a Lamport queue over `capacity + 1` equal slots carved from
//! one DMA-capable region. Indices wrap modulo `capacity`, and the ring is
//! full when `(write_index + 1) % capacity == read_index`, so at most
//! `capacity - 1` packets wait at once. Slot `capacity` is never read: a
//! packet arriving while the ring is full is copied there and counted as
//! dropped. Newest packets are dropped, queued ones are never overwritten,
//! and the producer never waits.
//!
//! # Safety Contract
//!
//! - Only ONE context may enqueue (the channel's completion handler).
//! - Only ONE context may dequeue (the reader, serialised by the channel).
//! - A slot's bytes are written before the index that publishes it is
//!   stored with `Release`, and the other side loads that index with
//!   `Acquire` before touching the slot.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::Error;
use crate::hal::{DmaRegion, WaitQueue};

/// What happened to an enqueued packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The ring was full; the packet went to the drop slot.
    Dropped,
}

#[derive(Debug)]
pub struct RingBuffer {
    storage: DmaRegion,
    slot_size: usize,
    capacity: usize,
    /// Next slot to fill (only modified by the producer).
    write_index: AtomicUsize,
    /// Next slot to read (only modified by the consumer).
    read_index: AtomicUsize,
    dropped: AtomicU32,
}

impl RingBuffer {
    /// Bytes of storage a ring of `capacity` slots of `slot_size` needs.
    pub const fn required_len(capacity: usize, slot_size: usize) -> usize {
        (capacity + 1) * slot_size
    }

    /// Build a ring over `storage`. Hands the region back if it is too small
    /// or `capacity` is below 2.
    pub fn new(storage: DmaRegion, capacity: usize, slot_size: usize) -> Result<Self, DmaRegion> {
        if capacity < 2 || slot_size == 0 || storage.len() < Self::required_len(capacity, slot_size) {
            return Err(storage);
        }
        Ok(RingBuffer {
            storage,
            slot_size,
            capacity,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
            dropped: AtomicU32::new(0),
        })
    }

    /// Give the storage back to its allocator.
    pub fn into_storage(self) -> DmaRegion {
        self.storage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_size
    }

    /// Enqueue a copy of `data`, zero-padding the slot. Never blocks.
    pub fn try_enqueue<W: WaitQueue + ?Sized>(&self, data: &[u8], readers: &W) -> EnqueueOutcome {
        let len = data.len().min(self.slot_size);
        self.enqueue_with(readers, |storage, offset| {
            storage.write_at(offset, &data[..len]);
            storage.fill_at(offset + len, self.slot_size - len, 0);
        })
    }

    /// Enqueue one slot's worth of bytes straight from another DMA region
    /// (a completed receive half).
    pub fn try_enqueue_from<W: WaitQueue + ?Sized>(
        &self,
        src: &DmaRegion,
        src_offset: usize,
        readers: &W,
    ) -> EnqueueOutcome {
        self.enqueue_with(readers, |storage, offset| {
            storage.copy_from_region(offset, src, src_offset, self.slot_size);
        })
    }

    fn enqueue_with<W: WaitQueue + ?Sized>(
        &self,
        readers: &W,
        fill: impl FnOnce(&DmaRegion, usize),
    ) -> EnqueueOutcome {
        let write = self.write_index.load(Ordering::Relaxed);
        let next = (write + 1) % self.capacity;

        if next == self.read_index.load(Ordering::Acquire) {
            fill(&self.storage, self.slot_offset(self.capacity));
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("rx ring full, packet dropped ({} total)", dropped);
            return EnqueueOutcome::Dropped;
        }

        // `next != read` means the consumer is not in this slot.
        fill(&self.storage, self.slot_offset(write));
        self.write_index.store(next, Ordering::Release);
        readers.wake_all();
        EnqueueOutcome::Enqueued
    }

    /// Copy the oldest packet into `out` and return its length (the slot
    /// size). An empty ring either waits on `readers` or returns
    /// [`Error::WouldBlock`].
    pub fn dequeue<W: WaitQueue + ?Sized>(
        &self,
        out: &mut [u8],
        blocking: bool,
        readers: &W,
    ) -> Result<usize, Error> {
        if out.len() < self.slot_size {
            return Err(Error::BufferTooSmall);
        }
        let read = self.read_index.load(Ordering::Relaxed);
        if read == self.write_index.load(Ordering::Acquire) {
            if !blocking {
                return Err(Error::WouldBlock);
            }
            readers
                .wait_until(&|| !self.is_empty())
                .map_err(|_| Error::Interrupted)?;
        }

        let n = self
            .storage
            .read_at(self.slot_offset(read), &mut out[..self.slot_size]);
        // The copy must complete before the producer may reuse the slot.
        self.read_index
            .store((read + 1) % self.capacity, Ordering::Release);
        Ok(n)
    }

    pub fn len(&self) -> usize {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        (write + self.capacity - read) % self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.read_index.load(Ordering::Acquire) == self.write_index.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        (write + 1) % self.capacity == read
    }

    /// Packets sent to the drop slot since creation or the last reset.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard queued packets and the drop count. Requires exclusive access,
    /// so neither side can be mid-operation.
    pub fn reset(&mut self) {
        *self.write_index.get_mut() = 0;
        *self.read_index.get_mut() = 0;
        *self.dropped.get_mut() = 0;
    }
}
