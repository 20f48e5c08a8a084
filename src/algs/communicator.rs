//! Thin façade over intra-process (mailbox) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*; the sender's slice is copied when the
//! send is posted, so the caller may reuse it immediately. Handles are
//! non-blocking: `test()` polls for completion, `wait()` blocks. `probe()` is
//! the one blocking query, used to size receives whose length is data
//! dependent.
//!
//! Per `(source, destination, tag)` channel messages are delivered in the
//! order they were posted (MPI's non-overtaking rule), and every backend here
//! preserves that.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This partition's rank.
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Block until a message from `peer` on `tag` is available and return its
    /// length in bytes without consuming it.
    fn probe(&self, peer: usize, tag: u16) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
    /// Poll for completion without blocking.
    fn test(&mut self) -> bool;
}

/// Compile-time no-op comm for single-partition runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
    fn test(&mut self) -> bool {
        true
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
    fn probe(&self, _peer: usize, _tag: u16) -> usize {
        0
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug)]
struct Envelope {
    data: Bytes,
    delivered: Arc<AtomicBool>,
}

/// FIFO channels shared by all ranks of one [`RayonComm::world`].
#[derive(Debug, Default)]
pub struct Mailbox {
    queues: DashMap<Key, VecDeque<Envelope>>,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) -> Arc<AtomicBool> {
        let delivered = Arc::new(AtomicBool::new(false));
        self.queues.entry(key).or_default().push_back(Envelope {
            data,
            delivered: delivered.clone(),
        });
        delivered
    }

    fn front_len(&self, key: &Key) -> Option<usize> {
        self.queues
            .get(key)
            .and_then(|q| q.front().map(|e| e.data.len()))
    }

    fn take(&self, key: &Key) -> Option<Bytes> {
        let env = self.queues.get_mut(key)?.pop_front()?;
        env.delivered.store(true, Ordering::Release);
        Some(env.data)
    }

    /// Messages posted but not yet received, over all channels.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Messages `from` has posted on `tag` that no receiver has taken yet,
    /// i.e. its incomplete sends on that tag.
    pub fn pending_from(&self, from: usize, tag: u16) -> usize {
        self.queues
            .iter()
            .filter(|q| q.key().0 == from && q.key().2 == tag)
            .map(|q| q.len())
            .sum()
    }
}

/// Send completes once the receiver has taken the message out of the
/// mailbox, which makes in-flight sends observable the way they are under
/// MPI's rendezvous protocol.
#[derive(Debug)]
pub struct LocalSendHandle {
    delivered: Arc<AtomicBool>,
}

impl Wait for LocalSendHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        while !self.test() {
            std::thread::yield_now();
        }
        None
    }
    fn test(&mut self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct LocalRecvHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    data: Option<Bytes>,
}

impl Wait for LocalRecvHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        while !self.test() {
            std::thread::yield_now();
        }
        self.data.map(|b| b.to_vec())
    }
    fn test(&mut self) -> bool {
        if self.data.is_none() {
            self.data = self.mailbox.take(&self.key);
        }
        self.data.is_some()
    }
}

/// In-process communicator: one instance per simulated partition, all
/// sharing the mailbox of the world they were created from.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// Create `size` connected communicators, rank `i` at index `i`.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

impl Communicator for RayonComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let delivered = self
            .mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
        LocalSendHandle { delivered }
    }

    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle {
        LocalRecvHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            data: None,
        }
    }

    fn probe(&self, peer: usize, tag: u16) -> usize {
        let key = (peer, self.rank, tag);
        loop {
            if let Some(n) = self.mailbox.front_len(&key) {
                return n;
            }
            std::thread::yield_now();
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::datatype::Equivalence;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// Communicator over `MPI_COMM_WORLD`. The caller keeps the
    /// [`mpi::environment::Universe`] alive for as long as this is used.
    #[derive(Clone)]
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    // SAFETY: requires MPI initialized with a threading level that permits
    // the calling pattern; the sweep itself drives MPI from one thread.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new(universe: &mpi::environment::Universe) -> Self {
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world: Arc::new(world),
                rank,
                size,
            }
        }
    }

    /// Owns a copy of the payload until MPI reports completion.
    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            None
        }
        fn test(&mut self) -> bool {
            match self.request.take() {
                None => true,
                Some(req) => match req.test() {
                    Ok(_) => true,
                    Err(req) => {
                        self.request = Some(req);
                        false
                    }
                },
            }
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::into_raw` and the request that
            // borrowed it has completed.
            unsafe { drop(Box::from_raw(self.buf)) };
        }
    }

    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
        data: Option<Vec<u8>>,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if self.data.is_none() {
                let (msg, _status) = self
                    .world
                    .process_at_rank(self.peer)
                    .matched_probe_with_tag(self.tag);
                let (data, _status): (Vec<u8>, _) = msg.matched_receive_vec();
                self.data = Some(data);
            }
            self.data
        }
        fn test(&mut self) -> bool {
            if self.data.is_none() {
                if let Some((msg, _status)) = self
                    .world
                    .process_at_rank(self.peer)
                    .immediate_matched_probe_with_tag(self.tag)
                {
                    let (data, _status): (Vec<u8>, _) = msg.matched_receive_vec();
                    self.data = Some(data);
                }
            }
            self.data.is_some()
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until the handle is dropped,
            // which waits for the request first.
            let data: &'static [u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSendHandle {
                request: Some(req),
                buf: raw,
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecvHandle {
            MpiRecvHandle {
                world: self.world.clone(),
                peer: peer as i32,
                tag: i32::from(tag),
                data: None,
            }
        }

        fn probe(&self, peer: usize, tag: u16) -> usize {
            let status = self
                .world
                .process_at_rank(peer as i32)
                .probe_with_tag(i32::from(tag));
            status.count(u8::equivalent_datatype()) as usize
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
