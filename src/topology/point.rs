//! `GlobalCellId`: a strong handle for cells across all partitions
//!
//! Local cells are addressed by their `usize` index inside a
//! [`PartitionTopology`](crate::topology::partition::PartitionTopology);
//! whenever a cell is named to another partition its global id is used
//! instead. On the wire the id is carried as a *marker*: `-(id) - 1`, always
//! negative, so a decoder can tell a cell marker from the non-negative face
//! ids and vertex ids that follow it.

use std::fmt;

/// Global (partition-independent) cell identifier.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct GlobalCellId(u64);

impl GlobalCellId {
    /// Largest id that still has a wire marker.
    pub const MAX: u64 = i64::MAX as u64;

    /// Creates a new `GlobalCellId`, or `None` if it cannot be encoded as a
    /// wire marker.
    #[inline]
    pub fn new(raw: u64) -> Option<Self> {
        (raw <= Self::MAX).then_some(GlobalCellId(raw))
    }

    /// Returns the raw id.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Negative wire marker `-(id) - 1`.
    #[inline]
    pub fn to_marker(self) -> i64 {
        -(self.0 as i64) - 1
    }

    /// Inverse of [`to_marker`](Self::to_marker); `None` for non-negative
    /// entries, which are not cell markers.
    #[inline]
    pub fn from_marker(marker: i64) -> Option<Self> {
        if marker < 0 {
            // -(marker + 1) cannot overflow for any negative i64
            Some(GlobalCellId((-(marker + 1)) as u64))
        } else {
            None
        }
    }
}

impl fmt::Debug for GlobalCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalCellId").field(&self.0).finish()
    }
}

impl fmt::Display for GlobalCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
