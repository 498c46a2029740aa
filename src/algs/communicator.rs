//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange helpers in
//! [`crate::algs::exchange`] call `.wait()` before they trust that a buffer is
//! ready. Messages between the same `(src, dst, tag)` triple are delivered in
//! the order they were sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

/// Typed message tag. Collectives derive their per-stage tags from a base tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `n` steps after this one (wrapping).
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        CommTag(self.0.wrapping_add(n))
    }
}

/// Tags for a two-stage exchange: sizes first, then payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process (or simulated process).
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for at most `buf.len()` bytes. The received bytes are
    /// returned by [`Wait::wait`]; `buf` only sizes the request.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Block until every rank has reached the barrier.
    fn barrier(&self);

    /// `true` when this communicator has a single rank.
    fn is_serial(&self) -> bool {
        self.size() == 1
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

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

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
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn barrier(&self) {}
}

// --- RayonComm: intra-process / multi-thread ---

type Key = (u64, usize, usize, u16); // (world, src, dst, tag)

#[derive(Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    arrived: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.queues.entry(key).or_default().push_back(data);
        let _guard = self.lock.lock();
        self.arrived.notify_all();
    }

    /// Pop the oldest message for `key`; drained queues are dropped.
    fn take(&self, key: &Key) -> Option<Bytes> {
        let bytes = self.queues.get_mut(key)?.pop_front();
        self.queues.remove_if(key, |_, queue| queue.is_empty());
        bytes
    }

    #[cfg(test)]
    fn pending_keys(&self, world: u64) -> usize {
        self.queues.iter().filter(|e| e.key().0 == world).count()
    }

    fn take_blocking(&self, key: &Key) -> Bytes {
        let mut guard = self.lock.lock();
        loop {
            if let Some(bytes) = self.take(key) {
                return bytes;
            }
            self.arrived.wait(&mut guard);
        }
    }
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(Mailbox::default);
static NEXT_WORLD: AtomicU64 = AtomicU64::new(1);

/// Pending receive on a [`RayonComm`].
pub struct LocalHandle {
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = MAILBOX.take_blocking(&self.key);
        let n = self.len.min(bytes.len());
        Some(bytes[..n].to_vec())
    }
}

/// Barrier shared by all ranks of one simulated world.
#[derive(Debug, Default)]
struct WorldBarrier {
    state: Mutex<(usize, u64)>, // (arrived, generation)
    cvar: Condvar,
}

static DEFAULT_BARRIER: Lazy<Arc<WorldBarrier>> = Lazy::new(Arc::default);

/// Ranks simulated by threads of one process.
///
/// Every rank of a world must share the same world id; [`RayonComm::world`]
/// hands out a fresh id so independent worlds never see each other's messages.
/// The world's barrier lives as long as its last handle.
#[derive(Clone, Debug)]
pub struct RayonComm {
    world: u64,
    rank: usize,
    size: usize,
    barrier: Arc<WorldBarrier>,
}

impl RayonComm {
    /// Rank `rank` of the default world (id 0) with `size` ranks.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            world: 0,
            rank,
            size,
            barrier: Arc::clone(&DEFAULT_BARRIER),
        }
    }

    /// All ranks of a fresh, isolated world.
    pub fn world(size: usize) -> Vec<Self> {
        let world = NEXT_WORLD.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new(WorldBarrier::default());
        (0..size)
            .map(|rank| Self {
                world,
                rank,
                size,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.world, self.rank, peer, tag);
        MAILBOX.post(key, Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            key: (self.world, peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn barrier(&self) {
        if self.size <= 1 {
            return;
        }
        let barrier = &self.barrier;
        let mut state = barrier.state.lock();
        let generation = state.1;
        state.0 += 1;
        if state.0 == self.size {
            state.0 = 0;
            state.1 += 1;
            barrier.cvar.notify_all();
        } else {
            while state.1 == generation {
                barrier.cvar.wait(&mut state);
            }
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::Threading;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// MPI world communicator.
    #[derive(Clone)]
    pub struct MpiComm {
        _universe: Arc<Universe>,
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    // MPI is initialised with `Threading::Multiple`, so the world handle may be
    // shared between threads.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialise MPI. Returns `None` if MPI was already initialised.
        pub fn new() -> Option<Self> {
            let (universe, _level) = mpi::initialize_with_threading(Threading::Multiple)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: Arc::new(universe),
                world: Arc::new(world),
                rank,
                size,
            })
        }
    }

    /// In-flight MPI request owning its buffer until completion.
    pub struct MpiHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
        is_recv: bool,
    }

    unsafe impl Send for MpiHandle {}

    impl MpiHandle {
        fn new(buf: Box<[u8]>, is_recv: bool) -> Self {
            Self {
                req: None,
                buf: Box::into_raw(buf),
                is_recv,
            }
        }
    }

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: the request has completed, nothing else references the buffer.
            let buf = unsafe { Box::from_raw(self.buf) };
            if self.is_recv { Some(buf.into_vec()) } else { None }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let mut handle = MpiHandle::new(buf.to_vec().into_boxed_slice(), false);
            // SAFETY: the boxed buffer stays allocated until `wait` reclaims it.
            let slice: &'static [u8] = unsafe { &*handle.buf };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            handle.req = Some(req);
            handle
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let mut handle = MpiHandle::new(vec![0u8; buf.len()].into_boxed_slice(), true);
            // SAFETY: as in `isend`; the request is the only user of the buffer.
            let slice: &'static mut [u8] = unsafe { &mut *handle.buf };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, tag as i32);
            handle.req = Some(req);
            handle
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let comms = RayonComm::world(2);
        let (comm0, comm1) = (&comms[0], &comms[1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn worlds_are_isolated() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 3, &[1]);
        b[0].isend(1, 3, &[2]);
        let mut buf = [0u8; 1];
        assert_eq!(b[1].irecv(0, 3, &mut buf).wait(), Some(vec![2]));
        assert_eq!(a[1].irecv(0, 3, &mut buf).wait(), Some(vec![1]));
    }

    #[test]
    fn drained_queues_and_barriers_are_released() {
        let comms = RayonComm::world(2);
        let world = comms[0].world;
        comms[0].isend(1, 9, &[1]);
        comms[0].isend(1, 9, &[2]);
        assert_eq!(MAILBOX.pending_keys(world), 1);
        let mut buf = [0u8; 1];
        assert_eq!(comms[1].irecv(0, 9, &mut buf).wait(), Some(vec![1]));
        assert_eq!(MAILBOX.pending_keys(world), 1);
        assert_eq!(comms[1].irecv(0, 9, &mut buf).wait(), Some(vec![2]));
        assert_eq!(MAILBOX.pending_keys(world), 0);

        let barrier = Arc::downgrade(&comms[0].barrier);
        drop(comms);
        assert!(barrier.upgrade().is_none());
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let comms = RayonComm::world(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| std::thread::spawn(move || {
                c.barrier();
                c.barrier();
                c.rank()
            }))
            .collect();
        let mut ranks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn comm_tags_offset() {
        let tags = ExchangeTags::from_base(CommTag::new(0x4100));
        assert_eq!(tags.sizes.as_u16(), 0x4100);
        assert_eq!(tags.data.as_u16(), 0x4101);
    }
}
