//! Flux exchange buffer: the asynchronous, flow-controlled transport of
//! boundary flux between partitions for one angle set.
//!
//! Every predecessor/successor buffer of the [`FluxDataStore`] is cut into
//! message slots of at most `eager_limit_bytes`; a buffer always has at least
//! one slot, so even an empty buffer produces a message and the receiver never
//! waits on something that will not come. Slots of one neighbor travel on one
//! tag and are received strictly in order, which keeps them matched under the
//! non-overtaking guarantee of the transport.
//!
//! Outgoing messages are flattened into a [`BytesMut`] arena and queued. At
//! most `max_in_flight` are posted at a time; the rest are posted from
//! [`FluxExchangeBuffer::clear_downstream_buffers`] as earlier ones complete.
//!
//! Delayed data crosses an edge that is not part of the acyclic order, so it
//! cannot be awaited inside the iteration that produces it. It is sent on its
//! own tag at the end of iteration `N` and polled for once this angle set has
//! swept ([`FluxExchangeBuffer::receive_delayed_psi`]), alongside the posting
//! of its own queued sends. Iteration `N + 1` then reads it; iteration 0
//! reads zeros. Only the one-time cell-view exchange blocks, on a probe for
//! the views of delayed predecessors.

use crate::algs::communicator::{Communicator, Wait};
use crate::algs::wire::{CommTag, SweepCommTags, decode_flux_into, decode_ints, encode_ints, put_flux};
use crate::config::SweepConfig;
use crate::mesh_error::MeshSweepError;
use crate::sweep::cell_view::CellViewMessage;
use crate::sweep::fluds::FluxDataStore;
use crate::sweep::plan::SweepPlan;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::ops::Range;

/// Message slots of one neighbor buffer, as value ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageLayout {
    pub peer: usize,
    pub slots: Vec<Range<usize>>,
}

impl MessageLayout {
    fn new(peer: usize, num_values: usize, values_per_message: usize) -> Self {
        let count = num_values.div_ceil(values_per_message).max(1);
        let slots = (0..count)
            .map(|k| {
                let start = (k * values_per_message).min(num_values);
                start..((k + 1) * values_per_message).min(num_values)
            })
            .collect();
        Self { peer, slots }
    }
}

/// Result of polling for upstream data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// At least one predecessor message is still outstanding.
    Receiving,
    /// Everything the sweep needs this iteration has arrived.
    Ready,
}

fn try_receive<C: Communicator>(comm: &C, peer: usize, tag: CommTag) -> Option<Vec<u8>> {
    let mut handle = comm.irecv(peer, tag.as_u16());
    if handle.test() { handle.wait() } else { None }
}

fn blocking_receive<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
) -> Result<Vec<u8>, MeshSweepError> {
    let expected = comm.probe(peer, tag.as_u16());
    let data = comm
        .irecv(peer, tag.as_u16())
        .wait()
        .ok_or_else(|| MeshSweepError::CommError {
            neighbor: peer,
            reason: format!("receive on tag {} returned no data", tag.as_u16()),
        })?;
    if data.len() != expected {
        return Err(MeshSweepError::Protocol {
            neighbor: peer,
            reason: format!("probed {expected} bytes, received {}", data.len()),
        });
    }
    Ok(data)
}

/// Exchange compact cell views with every neighbor of `plan`.
///
/// `outgoing[s]` is owed to `plan.location_successors()[s]`. Returns the
/// views of the ordinary predecessors and of the delayed predecessors, in
/// plan order. Collective over the neighbors of the plan, in three phases:
///
/// 1. post the views for delayed successors (nothing waits on them in order),
/// 2. probe and receive the views of delayed predecessors,
/// 3. receive from ordinary predecessors, then post to ordinary successors.
///
/// All sends are completed before returning; the local copies are released
/// as soon as they are flattened.
pub fn exchange_cell_views<C>(
    comm: &C,
    tags: &SweepCommTags,
    plan: &SweepPlan,
    outgoing: Vec<CellViewMessage>,
) -> Result<(Vec<CellViewMessage>, Vec<CellViewMessage>), MeshSweepError>
where
    C: Communicator,
{
    if outgoing.len() != plan.location_successors().len() {
        return Err(MeshSweepError::InvalidState(
            "one cell view message is owed per successor",
        ));
    }
    let tag = tags.cell_views;
    let mut outgoing: Vec<Option<CellViewMessage>> = outgoing.into_iter().map(Some).collect();
    let mut sends = Vec::with_capacity(outgoing.len());

    let mut post = |s: usize, outgoing: &mut [Option<CellViewMessage>]| {
        let peer = plan.location_successors()[s];
        let views = outgoing[s]
            .take()
            .ok_or(MeshSweepError::InvalidState("cell views posted twice"))?;
        let bytes = encode_ints(&views.serialize()?);
        log::trace!(
            "cell views: {} -> {peer}: {} cells, {} face dofs",
            plan.partition(),
            views.cells.len(),
            views.face_dof_count()
        );
        sends.push(comm.isend(peer, tag.as_u16(), &bytes));
        Ok::<(), MeshSweepError>(())
    };

    // 1) delayed successors
    for (s, &peer) in plan.location_successors().iter().enumerate() {
        if plan.is_delayed_successor(peer) {
            post(s, &mut outgoing)?;
        }
    }

    let receive = |peer: usize| -> Result<CellViewMessage, MeshSweepError> {
        let bytes = blocking_receive(comm, peer, tag)?;
        CellViewMessage::deserialize(&decode_ints(&bytes, peer)?, peer)
    };

    // 2) delayed predecessors
    let delayed = plan
        .delayed_location_dependencies()
        .iter()
        .map(|&peer| receive(peer))
        .collect::<Result<Vec<_>, _>>();

    // 3) ordinary predecessors, then ordinary successors
    let ordinary = delayed.and_then(|delayed| {
        let ordinary = plan
            .location_dependencies()
            .iter()
            .map(|&peer| receive(peer))
            .collect::<Result<Vec<_>, _>>()?;
        for (s, &peer) in plan.location_successors().iter().enumerate() {
            if !plan.is_delayed_successor(peer) {
                post(s, &mut outgoing)?;
            }
        }
        Ok((ordinary, delayed))
    });

    for send in sends {
        let _ = send.wait();
    }
    ordinary
}

struct QueuedSend {
    peer: usize,
    tag: CommTag,
    payload: Bytes,
}

/// Per angle set and partition: the asynchronous flux exchange.
pub struct FluxExchangeBuffer<C: Communicator> {
    comm: C,
    tags: SweepCommTags,
    max_in_flight: usize,

    upstream: Vec<MessageLayout>,
    delayed_upstream: Vec<MessageLayout>,
    downstream: Vec<MessageLayout>,
    downstream_delayed: Vec<bool>,
    max_num_messages: usize,

    preloc_message_received: Vec<Vec<bool>>,
    delayed_preloc_message_received: Vec<Vec<bool>>,

    queued: VecDeque<QueuedSend>,
    in_flight: Vec<C::SendHandle>,
    arena: BytesMut,

    done_sending: bool,
    data_initialized: bool,
    upstream_data_initialized: bool,
}

impl<C> FluxExchangeBuffer<C>
where
    C: Communicator,
{
    pub fn new(
        comm: C,
        tags: SweepCommTags,
        plan: &SweepPlan,
        fluds: &FluxDataStore,
        config: &SweepConfig,
    ) -> Result<Self, MeshSweepError> {
        config.validate()?;
        let per_message = config.values_per_message();
        let stride = fluds.stride();

        let upstream: Vec<MessageLayout> = plan
            .location_dependencies()
            .iter()
            .enumerate()
            .map(|(i, &p)| MessageLayout::new(p, fluds.preloc_face_dof_count(i) * stride, per_message))
            .collect();
        let delayed_upstream: Vec<MessageLayout> = plan
            .delayed_location_dependencies()
            .iter()
            .enumerate()
            .map(|(j, &p)| {
                MessageLayout::new(p, fluds.delayed_preloc_face_dof_count(j) * stride, per_message)
            })
            .collect();
        let downstream: Vec<MessageLayout> = plan
            .location_successors()
            .iter()
            .enumerate()
            .map(|(s, &p)| MessageLayout::new(p, fluds.deploc_face_dof_count(s) * stride, per_message))
            .collect();
        let downstream_delayed = plan
            .location_successors()
            .iter()
            .map(|&p| plan.is_delayed_successor(p))
            .collect();
        let max_num_messages = upstream
            .iter()
            .chain(&delayed_upstream)
            .chain(&downstream)
            .map(|l| l.slots.len())
            .max()
            .unwrap_or(0);

        let preloc_message_received = upstream.iter().map(|l| vec![false; l.slots.len()]).collect();
        let delayed_preloc_message_received = delayed_upstream
            .iter()
            .map(|l| vec![false; l.slots.len()])
            .collect();

        Ok(Self {
            comm,
            tags,
            max_in_flight: config.max_in_flight,
            upstream,
            delayed_upstream,
            downstream,
            downstream_delayed,
            max_num_messages,
            preloc_message_received,
            delayed_preloc_message_received,
            queued: VecDeque::new(),
            in_flight: Vec::new(),
            arena: BytesMut::new(),
            done_sending: false,
            data_initialized: false,
            upstream_data_initialized: false,
        })
    }

    pub fn tags(&self) -> &SweepCommTags {
        &self.tags
    }

    /// Largest slot count over all neighbor buffers.
    pub fn max_num_messages(&self) -> usize {
        self.max_num_messages
    }

    pub fn upstream_layouts(&self) -> &[MessageLayout] {
        &self.upstream
    }

    pub fn downstream_layouts(&self) -> &[MessageLayout] {
        &self.downstream
    }

    pub fn preloc_message_received(&self) -> &[Vec<bool>] {
        &self.preloc_message_received
    }

    pub fn delayed_preloc_message_received(&self) -> &[Vec<bool>] {
        &self.delayed_preloc_message_received
    }

    pub fn data_initialized(&self) -> bool {
        self.data_initialized
    }

    pub fn upstream_data_initialized(&self) -> bool {
        self.upstream_data_initialized
    }

    /// Outgoing messages not yet known to be complete, posted or queued.
    pub fn pending_sends(&self) -> usize {
        self.in_flight.len() + self.queued.len()
    }

    /// Poll every ordinary predecessor for the slots still missing. Never
    /// blocks.
    pub fn receive_upstream_psi(
        &mut self,
        fluds: &mut FluxDataStore,
    ) -> Result<ExchangeStatus, MeshSweepError> {
        if !self.data_initialized {
            fluds.allocate_preloc_psi();
            self.data_initialized = true;
        }
        let mut ready = true;
        for (i, layout) in self.upstream.iter().enumerate() {
            let received = &mut self.preloc_message_received[i];
            for (k, range) in layout.slots.iter().enumerate() {
                if received[k] {
                    continue;
                }
                match try_receive(&self.comm, layout.peer, self.tags.psi) {
                    Some(bytes) => {
                        decode_flux_into(
                            &bytes,
                            &mut fluds.preloc_psi_mut(i)[range.clone()],
                            layout.peer,
                        )?;
                        received[k] = true;
                    }
                    None => {
                        // later slots of this peer are queued behind this one
                        ready = false;
                        break;
                    }
                }
            }
        }
        Ok(if ready {
            ExchangeStatus::Ready
        } else {
            ExchangeStatus::Receiving
        })
    }

    /// Flatten every staging buffer into messages and post as many as the
    /// in-flight limit allows. Ordinary successors are queued ahead of
    /// delayed ones: nobody consumes delayed data before the end of the
    /// iteration.
    pub fn send_downstream_psi(&mut self, fluds: &FluxDataStore) {
        let successors = (0..self.downstream.len())
            .filter(|&s| !self.downstream_delayed[s])
            .chain((0..self.downstream.len()).filter(|&s| self.downstream_delayed[s]))
            .collect::<Vec<_>>();
        for s in successors {
            let layout = &self.downstream[s];
            let tag = if self.downstream_delayed[s] {
                self.tags.delayed_psi
            } else {
                self.tags.psi
            };
            let psi = fluds.deploc_psi(s);
            for range in &layout.slots {
                put_flux(&mut self.arena, &psi[range.clone()]);
                self.queued.push_back(QueuedSend {
                    peer: layout.peer,
                    tag,
                    payload: self.arena.split().freeze(),
                });
            }
        }
        self.done_sending = false;
        self.post_queued();
    }

    fn post_queued(&mut self) {
        while self.in_flight.len() < self.max_in_flight {
            let Some(msg) = self.queued.pop_front() else {
                break;
            };
            let handle = self.comm.isend(msg.peer, msg.tag.as_u16(), &msg.payload);
            self.in_flight.push(handle);
        }
    }

    /// Non-blocking: retire completed sends, post queued ones, and once
    /// everything is out release the staging buffers. Returns
    /// [`done_sending`](Self::done_sending).
    pub fn clear_downstream_buffers(&mut self, fluds: &mut FluxDataStore) -> bool {
        if self.done_sending {
            return true;
        }
        self.in_flight.retain_mut(|h| !h.test());
        self.post_queued();
        if self.in_flight.is_empty() && self.queued.is_empty() {
            self.done_sending = true;
            fluds.clear_send_psi();
        }
        self.done_sending
    }

    pub fn done_sending(&self) -> bool {
        self.done_sending
    }

    /// Poll every delayed predecessor for the slots of this iteration still
    /// missing and store them for the next one. Never blocks.
    ///
    /// Must only be called after this angle set has swept: the delayed
    /// buffers still hold the previous iteration's data until then.
    pub fn receive_delayed_psi(
        &mut self,
        fluds: &mut FluxDataStore,
    ) -> Result<ExchangeStatus, MeshSweepError> {
        if self.upstream_data_initialized {
            return Ok(ExchangeStatus::Ready);
        }
        let mut ready = true;
        for (j, layout) in self.delayed_upstream.iter().enumerate() {
            let received = &mut self.delayed_preloc_message_received[j];
            for (k, range) in layout.slots.iter().enumerate() {
                if received[k] {
                    continue;
                }
                match try_receive(&self.comm, layout.peer, self.tags.delayed_psi) {
                    Some(bytes) => {
                        decode_flux_into(
                            &bytes,
                            &mut fluds.delayed_preloc_psi_mut(j)[range.clone()],
                            layout.peer,
                        )?;
                        received[k] = true;
                    }
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
        }
        self.upstream_data_initialized = ready;
        Ok(if ready {
            ExchangeStatus::Ready
        } else {
            ExchangeStatus::Receiving
        })
    }

    /// Prepare for the next iteration. Layouts are kept.
    pub fn reset(&mut self) {
        if self.pending_sends() > 0 {
            log::warn!(
                "flux buffer on partition {} reset with {} sends outstanding",
                self.comm.rank(),
                self.pending_sends()
            );
        }
        self.preloc_message_received
            .iter_mut()
            .chain(self.delayed_preloc_message_received.iter_mut())
            .for_each(|flags| flags.fill(false));
        self.done_sending = false;
        self.data_initialized = false;
        self.upstream_data_initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_always_have_a_slot() {
        let empty = MessageLayout::new(3, 0, 4);
        assert_eq!(empty.slots, vec![0..0]);
        let exact = MessageLayout::new(3, 8, 4);
        assert_eq!(exact.slots, vec![0..4, 4..8]);
        let ragged = MessageLayout::new(3, 9, 4);
        assert_eq!(ragged.slots, vec![0..4, 4..8, 8..9]);
    }
}
