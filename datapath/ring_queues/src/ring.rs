//! The hardware-visible descriptor ring: a fixed-capacity circular array of
//! descriptor slots in DMA-capable memory, plus the index arithmetic that
//! wraps slot cursors around it. This component holds no queue state of its
//! own; callers guarantee indices are in range via the ring-state invariant.

use core::ptr::NonNull;
use dma_region::{AllocError, DmaAllocator, MappedRegion, PhysicalAddress, ViewError};

/// Descriptor rings must start on this boundary.
pub const RING_BASE_ALIGN: usize = 128;

/// A DMA-resident array of `num_descs` descriptors of type `D`.
///
/// `D` must be a `#[repr(C)]` hardware overlay for which all-zero bytes are
/// a valid (inert) descriptor; the backing memory is zeroed at reserve time.
/// The typed overlay is validated once at construction, so slot accesses
/// afterwards are straight pointer arithmetic with no failure path.
pub struct DescRing<D> {
    /// Owns the descriptor memory; `base` points into it.
    region: MappedRegion,
    base: NonNull<D>,
    num_descs: u16,
}

// The ring exclusively owns its descriptor memory, and the allocation does
// not move when the owning struct does, so the base pointer stays valid
// wherever the owner migrates.
unsafe impl<D: Send> Send for DescRing<D> {}

impl<D> DescRing<D> {
    /// Reserves and zeroes DMA memory for `num_descs` descriptors.
    pub fn new<A: DmaAllocator>(allocator: &A, num_descs: u16) -> Result<DescRing<D>, AllocError> {
        let size_in_bytes = usize::from(num_descs) * core::mem::size_of::<D>();
        let mut region = allocator.reserve_aligned(size_in_bytes, RING_BASE_ALIGN, None)?;
        // Prove the overlay here, once; every later slot access indexes the
        // checked base directly.
        let descs = region
            .as_slice_mut::<D>(0, usize::from(num_descs))
            .map_err(|e| match e {
                ViewError::Misaligned => AllocError::InvalidAlignment,
                ViewError::OutOfBounds | ViewError::SizeOverflow => AllocError::InvalidSize,
            })?;
        let base = NonNull::new(descs.as_mut_ptr()).ok_or(AllocError::InvalidSize)?;
        debug!(
            "DescRing: reserved {} descriptors ({} bytes) at {:?}",
            num_descs, size_in_bytes, region.start_address()
        );
        Ok(DescRing {
            region,
            base,
            num_descs,
        })
    }

    pub fn num_descs(&self) -> u16 {
        self.num_descs
    }

    /// The bus address of slot 0, as programmed into the device's ring-base
    /// register.
    pub fn base_address(&self) -> PhysicalAddress {
        self.region.start_address()
    }

    /// The descriptor at `index`, which the caller guarantees is in range.
    pub fn descriptor(&self, index: u16) -> &D {
        debug_assert!(index < self.num_descs);
        // Within the overlay proven at construction.
        unsafe { &*self.base.as_ptr().add(usize::from(index)) }
    }

    /// Mutable variant of [`descriptor`](Self::descriptor).
    pub fn descriptor_mut(&mut self, index: u16) -> &mut D {
        debug_assert!(index < self.num_descs);
        unsafe { &mut *self.base.as_ptr().add(usize::from(index)) }
    }

    /// The whole ring as a slice, used only by setup and reset loops.
    pub fn descriptors_mut(&mut self) -> &mut [D] {
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), usize::from(self.num_descs)) }
    }

    /// Advances `index` by `count` slots, wrapping at the ring capacity.
    pub fn advance(&self, index: u16, count: u16) -> u16 {
        (index + count) % self.num_descs
    }
}
