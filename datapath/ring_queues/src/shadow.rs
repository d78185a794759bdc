//! The software shadow ring.
//!
//! Hardware descriptors carry bus addresses, not software object identity,
//! so every ring keeps this parallel array mapping each slot to the owned
//! buffer whose memory that slot's descriptor points at. Ownership moves in
//! (`bind`) when a slot is handed to hardware and moves out (`take`) when
//! the slot completes; it is always a move, never a copy.

use alloc::vec::Vec;
use ring_buffers::DmaBuffer;

pub struct ShadowRing {
    entries: Vec<Option<DmaBuffer>>,
    bound: u16,
}

impl ShadowRing {
    pub fn new(num_slots: u16) -> ShadowRing {
        let mut entries = Vec::with_capacity(usize::from(num_slots));
        entries.resize_with(usize::from(num_slots), || None);
        ShadowRing { entries, bound: 0 }
    }

    /// Stores `buffer` as the owner of `index`'s slot.
    ///
    /// The slot must be logically free; the caller enforces this through the
    /// ring-state free count, and debug builds assert it.
    pub fn bind(&mut self, index: u16, buffer: DmaBuffer) {
        let previous = self.entries[usize::from(index)].replace(buffer);
        debug_assert!(previous.is_none(), "shadow slot {} double-bound", index);
        if previous.is_some() {
            // In release builds the evicted buffer routes back to its pool
            // via its own drop; the slot count is unchanged.
            error!("ShadowRing: slot {} was still occupied at bind", index);
        } else {
            self.bound += 1;
        }
    }

    /// Removes and returns the buffer owning `index`'s slot.
    pub fn take(&mut self, index: u16) -> Option<DmaBuffer> {
        let buffer = self.entries[usize::from(index)].take();
        debug_assert!(buffer.is_some(), "shadow slot {} taken while empty", index);
        if buffer.is_some() {
            self.bound -= 1;
        }
        buffer
    }

    pub fn is_bound(&self, index: u16) -> bool {
        self.entries[usize::from(index)].is_some()
    }

    /// The number of slots currently owning a buffer.
    pub fn bound_count(&self) -> u16 {
        self.bound
    }

    /// Releases every still-bound buffer back to its originating pool.
    ///
    /// Used only at teardown; handles partially-initialized rings (slots
    /// never bound) and returns the number of buffers released. Each buffer
    /// is dropped exactly once, so nothing is double-freed.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for entry in self.entries.iter_mut() {
            if entry.take().is_some() {
                released += 1;
            }
        }
        self.bound = 0;
        released
    }
}
