//! The receive queue: a ring kept pre-armed with pool buffers that hardware
//! fills, and a poll loop that swaps completed buffers out for fresh ones.
//!
//! Received frames are assembled across descriptors (a frame spans buffers
//! until its end-of-packet slot) and queued for the consumer. If the pool is
//! empty at refill time the frame is dropped and the slot re-armed with the
//! buffer it already has; rising drops under sustained overload are the
//! intended backpressure signal, not a condition the queue tries to buffer
//! its way out of.

use core::sync::atomic::{fence, Ordering};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use dma_region::DmaAllocator;
use ring_buffers::{BufferPool, DmaBuffer, ReceivedFrame};
use ring_descriptors::RxDescriptor;
use crate::config::validate_ring_size;
use crate::registers::TailRegister;
use crate::ring::DescRing;
use crate::shadow::ShadowRing;
use crate::SetupError;

/// A struct that holds all information for one receive queue.
/// There should be one such object per hardware queue, driven by one core.
pub struct RxQueue<D: RxDescriptor, R: TailRegister> {
    /// The number of the queue, matching its hardware queue index.
    pub id: u16,
    pub(crate) regs: R,
    pub(crate) descs: DescRing<D>,
    pub(crate) shadow: ShadowRing,
    /// The next descriptor to check for a received packet.
    pub(crate) cur: u16,
    /// Buffers of the frame currently being assembled (no end-of-packet
    /// slot seen yet).
    partial_frame: Vec<DmaBuffer>,
    /// Set while discarding the remainder of a frame that lost a buffer to
    /// pool exhaustion.
    dropping_frame: bool,
    /// Completed frames ready for the consumer, oldest first.
    received_frames: VecDeque<ReceivedFrame>,
    pool: Arc<BufferPool>,
}

impl<D: RxDescriptor, R: TailRegister> RxQueue<D, R> {
    /// Sets up a receive queue and arms every descriptor with a buffer from
    /// `pool`.
    ///
    /// The published tail is one less than the ring size: the sentinel slot
    /// stays with software so the hardware head can never catch the tail
    /// from behind.
    pub fn new<A: DmaAllocator>(
        id: u16,
        num_descs: u16,
        allocator: &A,
        pool: Arc<BufferPool>,
        mut regs: R,
    ) -> Result<RxQueue<D, R>, SetupError> {
        validate_ring_size(num_descs)?;
        let mut descs: DescRing<D> = DescRing::new(allocator, num_descs)?;
        let mut shadow = ShadowRing::new(num_descs);
        for index in 0..num_descs {
            let buf = pool.alloc().ok_or(SetupError::PoolExhausted)?;
            descs.descriptor_mut(index).init(buf.phys_addr());
            shadow.bind(index, buf);
        }
        fence(Ordering::Release);
        regs.write_tail(u32::from(num_descs - 1));
        debug!("RxQueue {}: {} descriptors armed", id, num_descs);
        Ok(RxQueue {
            id,
            regs,
            descs,
            shadow,
            cur: 0,
            partial_frame: Vec::new(),
            dropping_frame: false,
            received_frames: VecDeque::new(),
            pool,
        })
    }

    pub fn capacity(&self) -> u16 {
        self.descs.num_descs()
    }

    /// Completed frames waiting for [`take_frame`](Self::take_frame).
    pub fn frames_waiting(&self) -> usize {
        self.received_frames.len()
    }

    /// Polls the ring for received packets, storing completed frames.
    /// Returns the number of frames completed by this poll; zero is the
    /// ordinary result when nothing has arrived.
    pub fn poll(&mut self) -> usize {
        let mut completed = 0;
        loop {
            let cur = self.cur;
            if !self.descs.descriptor(cur).descriptor_done() {
                break;
            }
            // Order the length/status reads after the done bit.
            fence(Ordering::Acquire);
            let (length, end_of_packet) = {
                let desc = self.descs.descriptor(cur);
                (desc.length(), desc.end_of_packet())
            };

            match self.pool.alloc() {
                Some(new_buf) => {
                    let desc = self.descs.descriptor_mut(cur);
                    desc.set_packet_address(new_buf.phys_addr());
                    desc.reset_status();
                    if let Some(mut filled) = self.shadow.take(cur) {
                        if self.dropping_frame {
                            // tail of a frame we already gave up on
                            drop(filled);
                        } else {
                            if filled.set_length(length).is_err() {
                                warn!("RxQueue {}: write-back length {} exceeds buffer", self.id, length);
                            }
                            self.partial_frame.push(filled);
                        }
                    }
                    self.shadow.bind(cur, new_buf);
                    if end_of_packet {
                        if self.dropping_frame {
                            self.dropping_frame = false;
                        } else {
                            let bufs = core::mem::take(&mut self.partial_frame);
                            self.received_frames.push_back(ReceivedFrame(bufs));
                            completed += 1;
                        }
                    }
                }
                None => {
                    // Pool empty: re-arm the slot with the buffer it already
                    // has and discard the frame it belonged to.
                    warn!("RxQueue {}: buffer pool empty, dropping frame", self.id);
                    let desc = self.descs.descriptor_mut(cur);
                    desc.reset_status();
                    self.partial_frame.clear();
                    self.dropping_frame = !end_of_packet;
                }
            }

            // The re-armed descriptor must be visible before the slot is
            // handed back to hardware.
            fence(Ordering::Release);
            self.regs.write_tail(u32::from(cur));
            self.cur = self.descs.advance(cur, 1);
        }
        completed
    }

    /// Returns the earliest completed frame, if any.
    pub fn take_frame(&mut self) -> Option<ReceivedFrame> {
        self.received_frames.pop_front()
    }

    /// Releases every buffer the queue still owns back to its pool: armed
    /// slots, the partial frame, and undelivered completed frames. Used only
    /// at teardown; the queue must not be polled afterwards.
    pub fn release_buffers(&mut self) -> usize {
        let mut released = self.shadow.release_all();
        released += self.partial_frame.len();
        self.partial_frame.clear();
        for frame in self.received_frames.drain(..) {
            released += frame.0.len();
        }
        self.dropping_frame = false;
        debug!("RxQueue {}: released {} buffers at teardown", self.id, released);
        released
    }
}
