//! Fixed, little-endian wire types and message tags for the sweep.
//!
//! Two kinds of payload cross partition boundaries:
//! - cell-view messages: a flat sequence of signed 64-bit integers (see
//!   [`crate::sweep::cell_view`]), exchanged once per angle set;
//! - flux messages: raw `f64` values, exchanged every sweep iteration.

use crate::mesh_error::MeshSweepError;
use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, BytesMut};
use std::mem::size_of;

/// Largest tag used. MPI guarantees `MPI_TAG_UB >= 32767`.
pub const MAX_TAG: u32 = 32_767;

/// Tags consumed by one angle set above the plan tag.
pub const TAGS_PER_ANGLE_SET: u32 = 3;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Offset that refuses to leave `0..=MAX_TAG`.
    pub fn checked_offset(self, n: u32) -> Option<Self> {
        let t = u32::from(self.0).checked_add(n)?;
        (t <= MAX_TAG).then(|| Self(t as u16))
    }
}

/// Tags owned by one angle set.
///
/// Layout above `base`: `base` itself carries partition-graph gathers during
/// plan construction; angle set `k` owns `base + 1 + 3k ..= base + 3 + 3k`.
/// Distinct angle sets therefore never share a channel, and within a channel
/// successive sweep iterations are kept apart by per-channel FIFO order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SweepCommTags {
    /// Compact cell-view exchange at angle-set construction.
    pub cell_views: CommTag,
    /// Ordinary (current-iteration) boundary flux.
    pub psi: CommTag,
    /// Boundary flux crossing a delayed edge.
    pub delayed_psi: CommTag,
}

impl SweepCommTags {
    /// Tag used while gathering partition dependency lists.
    pub fn plan_tag(base: u16) -> CommTag {
        CommTag::new(base)
    }

    /// Tags for angle set `set`.
    ///
    /// # Errors
    /// [`MeshSweepError::TagSpaceExhausted`] if any of them would exceed
    /// [`MAX_TAG`].
    pub fn for_angle_set(base: u16, set: usize) -> Result<Self, MeshSweepError> {
        let base = CommTag::new(base);
        let first = u32::try_from(set)
            .ok()
            .and_then(|s| s.checked_mul(TAGS_PER_ANGLE_SET))
            .and_then(|s| s.checked_add(1));
        let exhausted = || MeshSweepError::TagSpaceExhausted {
            angle_set: set,
            needed: u32::from(base.as_u16())
                .saturating_add((set as u32).saturating_mul(TAGS_PER_ANGLE_SET))
                .saturating_add(TAGS_PER_ANGLE_SET),
            max: MAX_TAG,
        };
        let first = first.ok_or_else(exhausted)?;
        let tag = |k: u32| base.checked_offset(first + k).ok_or_else(exhausted);
        Ok(Self {
            cell_views: tag(0)?,
            psi: tag(1)?,
            delayed_psi: tag(2)?,
        })
    }
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// One signed integer of a cell-view message.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireInt {
    pub v_le: i64,
}

impl WireInt {
    pub fn new(v: i64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(&self) -> i64 {
        i64::from_le(self.v_le)
    }
}

/// Bytes per flux value.
pub const FLUX_BYTES: usize = size_of::<f64>();

/// Encode an integer message.
pub fn encode_ints(vals: &[i64]) -> Vec<u8> {
    let wire: Vec<WireInt> = vals.iter().map(|&v| WireInt::new(v)).collect();
    bytemuck::cast_slice(&wire).to_vec()
}

/// Decode an integer message received from `neighbor`.
pub fn decode_ints(bytes: &[u8], neighbor: usize) -> Result<Vec<i64>, MeshSweepError> {
    if bytes.len() % size_of::<WireInt>() != 0 {
        return Err(MeshSweepError::Protocol {
            neighbor,
            reason: format!(
                "integer message of {} bytes is not a multiple of {}",
                bytes.len(),
                size_of::<WireInt>()
            ),
        });
    }
    // copy out: receive buffers carry no alignment guarantee
    let wire: Vec<WireInt> = bytemuck::pod_collect_to_vec(bytes);
    Ok(wire.iter().map(WireInt::get).collect())
}

/// Append flux values to a send arena.
pub fn put_flux(out: &mut BytesMut, vals: &[f64]) {
    out.reserve(vals.len() * FLUX_BYTES);
    for &v in vals {
        out.put_f64_le(v);
    }
}

/// Decode a flux message from `neighbor` into `out`, which must match its
/// length exactly.
pub fn decode_flux_into(
    mut bytes: &[u8],
    out: &mut [f64],
    neighbor: usize,
) -> Result<(), MeshSweepError> {
    expect_exact_len(bytes.len(), out.len() * FLUX_BYTES)
        .map_err(|reason| MeshSweepError::Protocol { neighbor, reason })?;
    for v in out.iter_mut() {
        *v = bytes.get_f64_le();
    }
    Ok(())
}

const _: () = {
    assert!(size_of::<WireInt>() == 8);
    assert!(FLUX_BYTES == crate::config::FLUX_VALUE_BYTES);
};
