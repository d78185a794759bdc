//! Queue geometry and threshold validation.
//!
//! All rules are enforced once at setup so the hot paths can rely on them
//! unconditionally: the report threshold dividing the ring size is what lets
//! the producer mark fixed report slots and the consumer retire whole
//! windows without ever straddling the ring end.

use core::fmt;
use ring_descriptors::TxFeatures;

/// Descriptor counts must be a multiple of this granule.
pub const RING_DESC_GRANULE: u16 = 8;
/// Smallest supported ring.
pub const MIN_RING_DESCS: u16 = 16;
/// Largest supported ring.
pub const MAX_RING_DESCS: u16 = 4096;

/// Geometry, thresholds, and offload capabilities for one queue, supplied
/// once at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of descriptor slots in the ring.
    pub num_descs: u16,
    /// Granularity at which hardware is asked to report completion
    /// (and at which the consumer retires slots).
    pub submit_thresh: u16,
    /// The producer reclaims completed slots before submitting whenever the
    /// free count drops below this.
    pub free_thresh: u16,
    /// Offload flags encoded into every descriptor this queue writes.
    pub features: TxFeatures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `num_descs` is out of range or not a multiple of the granule.
    BadDescriptorCount,
    /// `submit_thresh` must be greater than zero.
    SubmitThreshZero,
    /// `submit_thresh` must leave room for the sentinel slot
    /// (at most `num_descs - 2`).
    SubmitThreshTooLarge,
    /// `submit_thresh` must evenly divide `num_descs`.
    SubmitThreshNotDivisor,
    /// `submit_thresh` must not exceed `free_thresh`.
    SubmitThreshAboveFree,
    /// `free_thresh` must be less than `num_descs - 3`.
    FreeThreshTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ConfigError::BadDescriptorCount => "descriptor count out of range or misaligned",
            ConfigError::SubmitThreshZero => "submit threshold must be nonzero",
            ConfigError::SubmitThreshTooLarge => "submit threshold too large for the ring",
            ConfigError::SubmitThreshNotDivisor => "submit threshold must divide the ring size",
            ConfigError::SubmitThreshAboveFree => "submit threshold exceeds the free threshold",
            ConfigError::FreeThreshTooLarge => "free threshold too large for the ring",
        })
    }
}

/// Checks a descriptor count alone; receive queues have no thresholds.
pub fn validate_ring_size(num_descs: u16) -> Result<(), ConfigError> {
    if num_descs < MIN_RING_DESCS
        || num_descs > MAX_RING_DESCS
        || num_descs % RING_DESC_GRANULE != 0
    {
        return Err(ConfigError::BadDescriptorCount);
    }
    Ok(())
}

impl RingConfig {
    /// Validates the full geometry, failing fast with the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ring_size(self.num_descs)?;
        if self.submit_thresh == 0 {
            return Err(ConfigError::SubmitThreshZero);
        }
        // one slot is always reserved as the sentinel that keeps an empty
        // ring distinguishable from a full one
        if self.submit_thresh > self.num_descs - 2 {
            return Err(ConfigError::SubmitThreshTooLarge);
        }
        if self.free_thresh >= self.num_descs - 3 {
            return Err(ConfigError::FreeThreshTooLarge);
        }
        if self.submit_thresh > self.free_thresh {
            return Err(ConfigError::SubmitThreshAboveFree);
        }
        if self.num_descs % self.submit_thresh != 0 {
            return Err(ConfigError::SubmitThreshNotDivisor);
        }
        Ok(())
    }
}
