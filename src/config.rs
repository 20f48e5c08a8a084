//! Sweep configuration.
//!
//! `SweepConfig` is a plain value passed explicitly to the scheduler and the
//! exchange buffers. It can be deserialized from any serde format so that a
//! front end can carry it alongside the rest of a problem description.

use crate::mesh_error::MeshSweepError;
use serde::{Deserialize, Serialize};

/// Bytes in one flux value on the wire.
pub const FLUX_VALUE_BYTES: usize = 8;

/// Tunables for the flux exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Upper bound on the payload of one flux message. Larger boundary
    /// buffers are split into several message slots.
    pub eager_limit_bytes: usize,
    /// Outgoing flux messages allowed in flight at once; further messages
    /// are queued and posted as earlier ones complete.
    pub max_in_flight: usize,
    /// First message tag used by the sweep. Each angle set takes a block of
    /// tags above it.
    pub base_tag: u16,
    /// Energy groups carried per face node.
    pub num_groups: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            eager_limit_bytes: 32_000,
            max_in_flight: 64,
            base_tag: 101,
            num_groups: 1,
        }
    }
}

impl SweepConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), MeshSweepError> {
        if self.eager_limit_bytes < FLUX_VALUE_BYTES {
            return Err(MeshSweepError::InvalidConfig(format!(
                "eager_limit_bytes must hold at least one flux value ({FLUX_VALUE_BYTES} bytes), got {}",
                self.eager_limit_bytes
            )));
        }
        if self.max_in_flight == 0 {
            return Err(MeshSweepError::InvalidConfig(
                "max_in_flight must be at least 1".into(),
            ));
        }
        if self.num_groups == 0 {
            return Err(MeshSweepError::InvalidConfig(
                "num_groups must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Flux values per message slot.
    pub fn values_per_message(&self) -> usize {
        self.eager_limit_bytes / FLUX_VALUE_BYTES
    }
}
