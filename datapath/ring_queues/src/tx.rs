//! The transmit queue: batched submission with deferred, threshold-gated
//! reclamation.
//!
//! The producer never blocks: a full ring shows up as a short submitted
//! count and the caller decides what to do with the remainder. Completion is
//! reaped in whole report windows, so hardware write-back traffic is
//! amortized over `submit_thresh` descriptors at a time.

use core::sync::atomic::{fence, Ordering};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use dma_region::DmaAllocator;
use ring_buffers::{BufferPool, DmaBuffer};
use ring_descriptors::{TxDescriptor, TxFeatures};
use crate::config::RingConfig;
use crate::registers::TailRegister;
use crate::ring::DescRing;
use crate::shadow::ShadowRing;
use crate::{SetupError, MAX_SUBMIT_BURST};

/// A struct that holds all information for one transmit queue.
/// There should be one such object per hardware queue, driven by one core.
pub struct TxQueue<D: TxDescriptor, R: TailRegister> {
    /// The number of the queue, matching its hardware queue index.
    pub id: u16,
    pub(crate) regs: R,
    pub(crate) descs: DescRing<D>,
    pub(crate) shadow: ShadowRing,
    /// Index of the next slot the producer will fill.
    pub(crate) tail: u16,
    /// Slots currently available for submission. At most `num_descs - 1`:
    /// one sentinel slot always stays unused so that an empty ring is never
    /// mistaken for a full one.
    pub(crate) free_count: u16,
    /// The slot whose done bit gates the next reclaim window: the last slot
    /// of the oldest outstanding report window.
    pub(crate) next_done: u16,
    submit_thresh: u16,
    free_thresh: u16,
    features: TxFeatures,
    pool: Arc<BufferPool>,
}

impl<D: TxDescriptor, R: TailRegister> TxQueue<D, R> {
    /// Sets up a transmit queue: validates the configuration, reserves and
    /// initializes the descriptor ring, and zeroes the hardware tail.
    pub fn new<A: DmaAllocator>(
        id: u16,
        config: RingConfig,
        allocator: &A,
        pool: Arc<BufferPool>,
        mut regs: R,
    ) -> Result<TxQueue<D, R>, SetupError> {
        config.validate()?;
        let mut descs: DescRing<D> = DescRing::new(allocator, config.num_descs)?;
        for desc in descs.descriptors_mut() {
            desc.init();
        }
        regs.write_tail(0);
        debug!("TxQueue {}: {} descriptors, submit_thresh {}, free_thresh {}",
            id, config.num_descs, config.submit_thresh, config.free_thresh);
        Ok(TxQueue {
            id,
            regs,
            shadow: ShadowRing::new(config.num_descs),
            tail: 0,
            free_count: config.num_descs - 1,
            next_done: config.submit_thresh - 1,
            submit_thresh: config.submit_thresh,
            free_thresh: config.free_thresh,
            features: config.features,
            pool,
            descs,
        })
    }

    pub fn capacity(&self) -> u16 {
        self.descs.num_descs()
    }

    /// Slots currently available for submission.
    pub fn free_count(&self) -> u16 {
        self.free_count
    }

    /// The producer-side cursor, for inspection.
    pub fn tail(&self) -> u16 {
        self.tail
    }

    /// Submits up to one hardware burst of buffers from the front of
    /// `batch`, returning how many were actually taken.
    ///
    /// When fewer descriptors are free than requested, the shortfall is
    /// reported through the return value; this path never blocks and never
    /// errors at runtime. Buffers left in `batch` remain owned by the
    /// caller.
    pub fn submit(&mut self, batch: &mut VecDeque<DmaBuffer>) -> usize {
        // Begin scanning for completed descriptors once the number of free
        // slots drops below the free threshold.
        if self.free_count < self.free_thresh {
            self.reclaim_window();
        }

        let mut count = batch.len().min(usize::from(MAX_SUBMIT_BURST)) as u16;
        count = count.min(self.free_count);
        if count == 0 {
            return 0;
        }
        self.free_count -= count;

        let num_descs = self.descs.num_descs();
        // If the batch wraps, fill the top of the ring first, then the
        // bottom; the processing for the no-wrap case is just the "top"
        // span reaching its natural end.
        let first_span = count.min(num_descs - self.tail);
        self.fill_descriptors(self.tail, first_span, batch);
        self.tail += first_span;
        if self.tail == num_descs {
            self.tail = 0;
        }
        let second_span = count - first_span;
        if second_span > 0 {
            self.fill_descriptors(0, second_span, batch);
            self.tail = second_span;
        }

        // Every descriptor write for this batch must be globally visible
        // before the doorbell store.
        fence(Ordering::Release);
        self.regs.write_tail(u32::from(self.tail));

        usize::from(count)
    }

    /// Submits an arbitrarily large batch in hardware-burst-sized chunks,
    /// stopping early at the first short chunk (the ring is full and nothing
    /// further has completed).
    pub fn submit_burst(&mut self, batch: &mut VecDeque<DmaBuffer>) -> usize {
        let mut submitted = 0;
        while !batch.is_empty() {
            let want = batch.len().min(usize::from(MAX_SUBMIT_BURST));
            let sent = self.submit(batch);
            submitted += sent;
            if sent < want {
                break;
            }
        }
        submitted
    }

    fn fill_descriptors(&mut self, start: u16, count: u16, batch: &mut VecDeque<DmaBuffer>) {
        let thresh = self.submit_thresh;
        let features = self.features;
        for i in 0..count {
            let slot = start + i;
            let buf = match batch.pop_front() {
                Some(buf) => buf,
                None => break,
            };
            let desc = self.descs.descriptor_mut(slot);
            desc.send(buf.phys_addr(), buf.length(), features, true);
            // Report slots sit at fixed positions: the threshold divides the
            // ring size, so the last slot of every window (including the
            // last slot before the wrap) requests a completion report.
            if slot % thresh == thresh - 1 {
                desc.request_report();
            }
            self.shadow.bind(slot, buf);
        }
    }

    /// Submits one frame chained across several buffers; only the last
    /// segment's descriptor carries end-of-packet.
    ///
    /// All-or-nothing: a partially-submitted chain would transmit a
    /// truncated frame, so if the segments do not all fit the frame comes
    /// back to the caller unchanged in the error value.
    pub fn submit_chained(&mut self, segments: Vec<DmaBuffer>) -> Result<u16, Vec<DmaBuffer>> {
        let count = segments.len() as u16;
        if count == 0 || count > MAX_SUBMIT_BURST {
            return Err(segments);
        }
        if self.free_count < self.free_thresh {
            self.reclaim_window();
        }
        if count > self.free_count {
            return Err(segments);
        }
        self.free_count -= count;

        let thresh = self.submit_thresh;
        let features = self.features;
        let last = count - 1;
        let mut slot = self.tail;
        for (i, buf) in segments.into_iter().enumerate() {
            let desc = self.descs.descriptor_mut(slot);
            desc.send(buf.phys_addr(), buf.length(), features, i as u16 == last);
            if slot % thresh == thresh - 1 {
                desc.request_report();
            }
            self.shadow.bind(slot, buf);
            slot = self.descs.advance(slot, 1);
        }
        self.tail = slot;

        fence(Ordering::Release);
        self.regs.write_tail(u32::from(self.tail));
        Ok(count)
    }

    /// Reclaims completed slots, at most `max`, in whole report windows.
    ///
    /// Returns the number of slots reclaimed. When the boundary descriptor
    /// of the oldest window has not been written back yet this is a true
    /// no-op: no state changes and 0 is returned. This is the backpressure
    /// gate; submission can never outrun completion by more than the
    /// outstanding windows.
    pub fn reap(&mut self, max: u16) -> u16 {
        let mut reclaimed = 0;
        while reclaimed + self.submit_thresh <= max {
            let n = self.reclaim_window();
            if n == 0 {
                break;
            }
            reclaimed += n;
        }
        reclaimed
    }

    /// Retires the oldest report window if its boundary descriptor shows the
    /// hardware-set done bit.
    fn reclaim_window(&mut self) -> u16 {
        // A full window must actually be outstanding: a retired slot keeps
        // its done bit until it is resubmitted, so the boundary check alone
        // would mistake stale write-back for fresh completion.
        let outstanding = self.descs.num_descs() - 1 - self.free_count;
        if outstanding < self.submit_thresh {
            return 0;
        }
        if !self.descs.descriptor(self.next_done).descriptor_done() {
            return 0;
        }
        // The done bit was observed; order the rest of the write-back (and
        // our reuse of the buffers) after it.
        fence(Ordering::Acquire);

        let thresh = self.submit_thresh;
        // The first slot of this window; windows never straddle the ring
        // end because the threshold divides the ring size.
        let first = self.next_done + 1 - thresh;
        let mut window: Vec<DmaBuffer> = Vec::with_capacity(usize::from(thresh));
        for i in 0..thresh {
            if let Some(buf) = self.shadow.take(first + i) {
                window.push(buf);
            }
        }
        let taken = window.len() as u16;
        debug_assert_eq!(taken, thresh, "report window {} was not fully bound", first);
        // Bulk return; buffers from a foreign pool route themselves home.
        self.pool.free_bulk(window);

        self.free_count += taken;
        self.next_done += thresh;
        if self.next_done >= self.descs.num_descs() {
            self.next_done = thresh - 1;
        }
        taken
    }

    /// Returns the queue to its initial state: every in-flight buffer goes
    /// back to its pool without waiting for hardware, descriptors are
    /// cleared, and all cursors are re-derived. Used on queue stop.
    pub fn reset(&mut self) {
        let released = self.shadow.release_all();
        if released > 0 {
            debug!("TxQueue {}: released {} in-flight buffers at reset", self.id, released);
        }
        for desc in self.descs.descriptors_mut() {
            desc.init();
        }
        self.tail = 0;
        self.free_count = self.descs.num_descs() - 1;
        self.next_done = self.submit_thresh - 1;
        self.regs.write_tail(0);
    }
}
