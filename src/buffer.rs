//! `BufferPool` and `BufferSegment` (§4.1): a slab of fixed-size buffers rented to
//! commands, with a one-shot heap path for oversized requests/responses.

use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Large buffers above this size are never slab-backed; they are heap-allocated for a
/// single use and dropped rather than recycled (§3's BufferSegment regimes).
pub const SLAB_CUTOFF: usize = 128 * 1024;

const SLAB_ALIGNMENT: usize = 8 * 1024;

fn round_up_to_alignment(size: usize) -> usize {
    size.div_ceil(SLAB_ALIGNMENT) * SLAB_ALIGNMENT
}

struct Inner {
    slot_size: usize,
    slots: Mutex<Vec<BytesMut>>,
}

/// A slab of `slot_size`-byte buffers, `capacity` deep, guarded by a single mutex so
/// acquisition is O(1) (§4.1).
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        let slot_size = round_up_to_alignment(slot_size.max(1));
        let slots = (0..capacity)
            .map(|_| BytesMut::zeroed(slot_size))
            .collect();
        Self {
            inner: Arc::new(Inner {
                slot_size,
                slots: Mutex::new(slots),
            }),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    /// Rents a buffer able to hold `required` bytes. Slab-backed when `required` fits
    /// in a slot (and a slot is free); otherwise (or when the slab is exhausted for a
    /// request larger than a slot) a one-shot heap buffer is allocated.
    pub fn rent(&self, required: usize) -> BufferSegment {
        if required <= self.inner.slot_size {
            if let Some(mut slot) = self.inner.slots.lock().unwrap().pop() {
                slot.resize(required, 0);
                return BufferSegment {
                    data: slot,
                    origin: Origin::Slab(self.clone()),
                };
            }
        }
        BufferSegment {
            data: BytesMut::zeroed(required),
            origin: Origin::Heap,
        }
    }

    fn give_back(&self, mut slot: BytesMut) {
        slot.resize(self.inner.slot_size, 0);
        self.inner.slots.lock().unwrap().push(slot);
    }
}

#[derive(Clone)]
enum Origin {
    Slab(BufferPool),
    Heap,
}

/// An owned, rented buffer. Slab-backed segments return their storage to the pool on
/// drop; heap segments (beyond [`SLAB_CUTOFF`]) are simply dropped.
pub struct BufferSegment {
    data: BytesMut,
    origin: Origin,
}

impl BufferSegment {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grows the segment to at least `new_len` bytes, reallocating on the heap (and
    /// detaching from the slab) if it was slab-backed and the new length no longer
    /// fits a slot.
    pub fn resize(&mut self, new_len: usize) {
        if let Origin::Slab(pool) = &self.origin {
            if new_len > pool.inner.slot_size {
                self.origin = Origin::Heap;
            }
        }
        self.data.resize(new_len, 0);
    }

    pub fn is_slab_backed(&self) -> bool {
        matches!(self.origin, Origin::Slab(_))
    }
}

impl Drop for BufferSegment {
    fn drop(&mut self) {
        if let Origin::Slab(pool) = &self.origin {
            pool.give_back(std::mem::take(&mut self.data));
        }
    }
}
