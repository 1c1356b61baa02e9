//! Thin façade over intra-process (thread) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: callers `.wait()` before
//! they trust that a receive buffer is filled. On top of the point-to-point
//! primitives every communicator provides [`Communicator::all_gather_bytes`],
//! the single collective the assembly layer is built on.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::algs::collective::all_gather_bytes_p2p;
use crate::matrix_error::MatrixError;

/// Typed message tag. Collective helpers reserve `base` and `base + 1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `k` slots after this one (wrapping).
    #[inline]
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

impl Default for CommTag {
    fn default() -> Self {
        CommTag(0xA11C)
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank in the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// A communicator containing only the calling process.
    fn comm_self() -> Self
    where
        Self: Sized;

    /// True for the compile-time serial communicator.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Gather one byte buffer from every rank, returned in rank order.
    ///
    /// Collective: every rank of the group must call it with the same tag.
    fn all_gather_bytes(&self, tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, MatrixError> {
        all_gather_bytes_p2p(self, tag, local)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial use.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn comm_self() -> Self {
        NoComm
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- ThreadComm: intra-process, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static GLOBAL_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// Pending receive on a [`ThreadComm`] mailbox.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = self.len.min(bytes.len());
                    return Some(bytes[..n].to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

/// Ranks simulated by threads of one process.
///
/// Messages between a (src, dst, tag) triple are delivered in FIFO order, so
/// repeated collectives on the same tag stay matched as long as every rank
/// issues them in the same order.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Rank `rank` of a `size`-rank group on the process-global mailbox.
    ///
    /// Groups created this way share one mailbox; tests using it run serially.
    pub fn new(rank: usize, size: usize) -> Self {
        debug_assert!(rank < size, "rank {rank} out of range for size {size}");
        Self {
            rank,
            size,
            mailbox: GLOBAL_MAILBOX.clone(),
        }
    }

    /// All ranks of a fresh, isolated `size`-rank group.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn comm_self() -> Self {
        Self::world(1).remove(0)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// MPI communicator; clones share the same underlying group.
    #[derive(Clone)]
    pub struct MpiComm {
        comm: Arc<SimpleCommunicator>,
        _universe: Option<Arc<Universe>>,
        rank: usize,
        size: usize,
    }

    // SAFETY: the handle is only used from the thread that drives the
    // assembly; MPI is initialised before any MpiComm exists.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialise MPI and return the world communicator.
        pub fn new() -> Result<Self, MatrixError> {
            let universe = mpi::initialize().ok_or_else(|| MatrixError::Comm {
                neighbor: 0,
                message: "MPI initialization failed".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                comm: Arc::new(world),
                _universe: Some(Arc::new(universe)),
                rank,
                size,
            })
        }
    }

    /// Deferred blocking receive, performed on `wait`.
    pub struct MpiRecvHandle {
        comm: Arc<SimpleCommunicator>,
        peer: usize,
        tag: u16,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut data, _status) = self
                .comm
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            data.truncate(self.len);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.comm
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                comm: self.comm.clone(),
                peer,
                tag,
                len: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn comm_self() -> Self {
            Self {
                comm: Arc::new(SimpleCommunicator::self_comm()),
                _universe: None,
                rank: 0,
                size: 1,
            }
        }

        fn all_gather_bytes(
            &self,
            _tag: CommTag,
            local: &[u8],
        ) -> Result<Vec<Vec<u8>>, MatrixError> {
            let mut counts: Vec<Count> = vec![0; self.size];
            let local_count = local.len() as Count;
            self.comm.all_gather_into(&local_count, &mut counts[..]);

            let displs: Vec<Count> = counts
                .iter()
                .scan(0, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut flat = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
                self.comm.all_gather_varcount_into(local, &mut partition);
            }

            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| flat[d as usize..(d + c) as usize].to_vec())
                .collect())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let comms = ThreadComm::world(2);
        let (c0, c1) = (&comms[0], &comms[1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = c1.irecv(0, 7, &mut recv_buf);
        c0.isend(1, 7, &[1, 2, 3, 4]).wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn worlds_are_isolated() {
        let a = ThreadComm::world(2);
        let b = ThreadComm::world(2);
        a[0].isend(1, 3, &[9]);
        b[0].isend(1, 3, &[5]);
        let mut buf = [0u8; 1];
        assert_eq!(b[1].irecv(0, 3, &mut buf).wait(), Some(vec![5]));
        assert_eq!(a[1].irecv(0, 3, &mut buf).wait(), Some(vec![9]));
    }

    #[test]
    fn comm_self_is_single_rank() {
        let c = ThreadComm::comm_self();
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(NoComm::comm_self().is_no_comm());
    }

    #[test]
    fn tag_offsets_wrap() {
        assert_eq!(CommTag::new(0xFFFF).offset(2), CommTag(1));
        assert_eq!(CommTag::new(10).offset(1).as_u16(), 11);
    }
}
