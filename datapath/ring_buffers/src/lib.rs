//! Packet buffers and the bounded pool that recycles them.
//!
//! A [`DmaBuffer`] is the owned handle that moves through the ring engine:
//! from the pool into a ring's shadow entries, out to a consumer, and back to
//! the pool when dropped. The pool itself is a fixed set of pre-reserved,
//! physically-contiguous buffers behind a lock-free bounded queue; it is
//! constructed explicitly at setup and shared by reference, never through a
//! process-wide singleton.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use] extern crate log;
extern crate crossbeam_queue;
extern crate dma_region;

use core::fmt;
use core::ops::{Deref, DerefMut};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use crossbeam_queue::ArrayQueue;
use dma_region::{AllocError, DmaAllocator, MappedRegion, PhysicalAddress};

/// Packet buffers start on their own cache line.
const BUFFER_ALIGN: usize = 64;

/// The pool could not supply the requested number of buffers.
///
/// This is the normal signal that consumers are holding too many buffers; it
/// is recoverable and expected under load, not a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Underrun;

impl fmt::Display for Underrun {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("buffer pool underrun")
    }
}

/// A buffer that stores one packet and is guaranteed to be contiguous in
/// physical memory. Auto-dereferences into the byte slice holding the packet.
///
/// A buffer obtained from a [`BufferPool`] automatically returns itself to
/// that pool when dropped, so handing one to a consumer transfers ownership
/// without leaking pool capacity.
pub struct DmaBuffer {
    region: MappedRegion,
    phys_addr: PhysicalAddress,
    length: u16,
    pool: Option<Arc<BufferPool>>,
}

impl DmaBuffer {
    /// Creates a standalone buffer of `size_in_bytes` that is not associated
    /// with any pool; dropping it frees its memory outright.
    pub fn new<A: DmaAllocator>(allocator: &A, size_in_bytes: u16) -> Result<DmaBuffer, AllocError> {
        let region = allocator.reserve_aligned(size_in_bytes as usize, BUFFER_ALIGN, None)?;
        let phys_addr = region.start_address();
        Ok(DmaBuffer {
            region,
            phys_addr,
            length: size_in_bytes,
            pool: None,
        })
    }

    pub fn phys_addr(&self) -> PhysicalAddress {
        self.phys_addr
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// The full size of the underlying memory, independent of the current length.
    pub fn capacity(&self) -> u16 {
        self.region.size_in_bytes() as u16
    }

    /// Sets the buffer's length, e.g. to the size of a received packet.
    ///
    /// Returns an error if the length exceeds the buffer's capacity.
    pub fn set_length(&mut self, length: u16) -> Result<(), &'static str> {
        if usize::from(length) > self.region.size_in_bytes() {
            Err("DmaBuffer::set_length(): length exceeds buffer capacity")
        } else {
            self.length = length;
            Ok(())
        }
    }

    /// The pool this buffer returns to on drop, if any.
    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }
}

impl Deref for DmaBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // `length` never exceeds the region: enforced at construction and
        // on every `set_length`.
        self.region.bytes(usize::from(self.length))
    }
}

impl DerefMut for DmaBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.region.bytes_mut(usize::from(self.length))
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            // We cannot move out of `self` here, so build the returned buffer
            // by swapping an empty placeholder region into our slot and
            // taking ownership of the real one.
            let returned = DmaBuffer {
                region: core::mem::replace(&mut self.region, MappedRegion::empty()),
                phys_addr: self.phys_addr,
                length: 0,
                pool: None,
            };
            pool.free(returned);
        }
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DmaBuffer {{ phys_addr: {:?}, length: {}, pooled: {} }}",
            self.phys_addr, self.length, self.pool.is_some())
    }
}

/// A network frame received by the device. A single frame can span multiple
/// receive buffers, in arrival order.
pub struct ReceivedFrame(pub Vec<DmaBuffer>);

impl ReceivedFrame {
    /// Total length of the frame across all of its buffers.
    pub fn total_length(&self) -> usize {
        self.0.iter().map(|b| usize::from(b.length())).sum()
    }
}

/// A fixed-capacity pool of pre-reserved packet buffers.
///
/// All buffers are reserved up front at construction; the pool never grows.
/// `alloc` and `free` are lock-free and safe from any thread, satisfying the
/// shared-resource contract of queues driven by different cores.
pub struct BufferPool {
    free_list: ArrayQueue<DmaBuffer>,
    buffer_size: u16,
    capacity: usize,
    me: Weak<BufferPool>,
}

impl BufferPool {
    /// Creates a pool of `num_buffers` buffers of `buffer_size` bytes each,
    /// reserved through `allocator` and immediately available.
    pub fn new<A: DmaAllocator>(
        num_buffers: usize,
        buffer_size: u16,
        allocator: &A,
    ) -> Result<Arc<BufferPool>, AllocError> {
        if num_buffers == 0 {
            return Err(AllocError::InvalidSize);
        }
        let pool = Arc::new_cyclic(|me| BufferPool {
            free_list: ArrayQueue::new(num_buffers),
            buffer_size,
            capacity: num_buffers,
            me: me.clone(),
        });
        for _i in 0..num_buffers {
            let buf = DmaBuffer::new(allocator, buffer_size)?;
            if pool.free_list.push(buf).is_err() {
                // Cannot happen: the queue was sized for exactly this many.
                return Err(AllocError::InvalidSize);
            }
        }
        debug!("BufferPool: created pool of {} buffers of {} bytes", num_buffers, buffer_size);
        Ok(pool)
    }

    /// Takes one buffer from the pool, or `None` if it is empty.
    pub fn alloc(&self) -> Option<DmaBuffer> {
        let mut buf = self.free_list.pop()?;
        buf.length = self.buffer_size;
        buf.pool = self.me.upgrade();
        Some(buf)
    }

    /// Takes exactly `count` buffers, or none at all.
    ///
    /// All-or-nothing so that a submission path never does half a batch's
    /// worth of work before discovering the shortfall.
    pub fn alloc_bulk(&self, count: usize) -> Result<Vec<DmaBuffer>, Underrun> {
        let mut bufs = Vec::with_capacity(count);
        for _ in 0..count {
            match self.alloc() {
                Some(buf) => bufs.push(buf),
                None => {
                    // put back what we took; order within the pool is not
                    // part of its contract
                    self.free_bulk(bufs);
                    return Err(Underrun);
                }
            }
        }
        Ok(bufs)
    }

    /// Returns one buffer to the pool.
    ///
    /// A buffer that belongs to a different pool is routed back to its own
    /// pool instead; this is the slow path for mixed-pool batches.
    pub fn free(&self, mut buf: DmaBuffer) {
        if let Some(owner) = buf.pool.take() {
            if !core::ptr::eq(Arc::as_ptr(&owner), self) {
                owner.free(buf);
                return;
            }
        }
        buf.length = 0;
        if let Err(_rejected) = self.free_list.push(buf) {
            // A buffer this pool never handed out; dropping it frees its
            // memory rather than corrupting the pool's accounting.
            error!("BufferPool: free list unexpectedly full, releasing buffer memory");
        }
    }

    /// Returns a batch of buffers in one pass.
    pub fn free_bulk(&self, bufs: impl IntoIterator<Item = DmaBuffer>) {
        for buf in bufs {
            self.free(buf);
        }
    }

    /// The number of buffers currently available.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// The number of buffers the pool was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The size in bytes of every buffer in this pool.
    pub fn buffer_size(&self) -> u16 {
        self.buffer_size
    }
}
