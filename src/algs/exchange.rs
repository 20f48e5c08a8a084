//! Collective helpers built on the point-to-point [`Communicator`].
//!
//! Every rank must call these in the same order with the same tag. All send
//! handles are drained before returning, even if a receive failed.

use crate::algs::communicator::{Communicator, Wait};
use crate::algs::wire::{CommTag, decode_ints, encode_ints};
use crate::mesh_error::MeshSweepError;

/// Every rank contributes `local`; returns all contributions indexed by rank.
pub fn all_gather_ints<C>(
    comm: &C,
    tag: CommTag,
    local: &[i64],
) -> Result<Vec<Vec<i64>>, MeshSweepError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    let payload = encode_ints(local);

    // 1) post all sends
    let pending: Vec<C::SendHandle> = (0..size)
        .filter(|&p| p != me)
        .map(|p| comm.isend(p, tag.as_u16(), &payload))
        .collect();

    // 2) receive from every peer in rank order, but do not early-return
    let mut out = vec![Vec::new(); size];
    out[me] = local.to_vec();
    let mut maybe_err = None;
    for peer in (0..size).filter(|&p| p != me) {
        match comm.irecv(peer, tag.as_u16()).wait() {
            Some(data) => match decode_ints(&data, peer) {
                Ok(v) => out[peer] = v,
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            },
            None => {
                maybe_err.get_or_insert(MeshSweepError::CommError {
                    neighbor: peer,
                    reason: format!("no gather contribution received from rank {peer}"),
                });
            }
        }
    }

    // 3) always drain all send handles before returning
    for send in pending {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}
