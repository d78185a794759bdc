//! The descriptor-ring producer/consumer engine.
//!
//! One [`TxQueue`] or [`RxQueue`] wraps one hardware queue: a DMA-resident
//! ring of descriptors, a shadow ring tracking which owned buffer lives in
//! which slot, and the tail doorbell through which batches are handed to the
//! device. Each queue instance is driven by exactly one core in a poll loop;
//! there is no locking anywhere on these paths, and nothing here ever blocks.
//! Running out of ring space is reported as a short submission count, and an
//! empty poll is an ordinary zero return.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use] extern crate log;
extern crate dma_region;
extern crate ring_buffers;
extern crate ring_descriptors;

pub mod config;
pub mod registers;
mod ring;
mod shadow;
mod tx;
mod rx;

pub use config::{ConfigError, RingConfig};
pub use registers::{MmioTailRegister, TailRegister};
pub use ring_descriptors::TxFeatures;
pub use ring::DescRing;
pub use shadow::ShadowRing;
pub use tx::TxQueue;
pub use rx::RxQueue;

use core::fmt;
use dma_region::AllocError;

/// The hardware burst limit: the most descriptors one submission fills
/// before ringing the doorbell.
pub const MAX_SUBMIT_BURST: u16 = 32;

/// Errors that make a queue unusable at setup time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupError {
    /// The ring geometry or thresholds were rejected.
    Config(ConfigError),
    /// DMA memory for the descriptor ring could not be reserved.
    Alloc(AllocError),
    /// The buffer pool could not pre-fill the receive ring.
    PoolExhausted,
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> SetupError {
        SetupError::Config(e)
    }
}

impl From<AllocError> for SetupError {
    fn from(e: AllocError) -> SetupError {
        SetupError::Alloc(e)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SetupError::Config(e) => write!(f, "invalid queue configuration: {}", e),
            SetupError::Alloc(e) => write!(f, "descriptor ring allocation failed: {}", e),
            SetupError::PoolExhausted => f.write_str("buffer pool too small to fill the ring"),
        }
    }
}
