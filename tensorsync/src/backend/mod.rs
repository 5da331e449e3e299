//! The byte-moving layer underneath the operations.
//!
//! A backend implements the three blocking collective primitives the
//! engine needs. Every rank must call them in the same order with
//! compatible arguments; a backend is free to block until all ranks arrive.
//! A rank that fails a local check before a primitive calls
//! [`CollectiveBackend::abort`] in its place, so every rank still makes one
//! backend call per batch.

mod local;

pub use local::{LocalBackend, LocalMesh};

use crate::entry::TensorEntry;
use crate::error::Result;
use crate::types::{DataType, DeviceId, Rank};

/// Role-dependent buffer for a broadcast.
///
/// The root only reads its data; every other rank only writes.
#[derive(Debug)]
pub enum BroadcastBuffer<'a> {
    Send(&'a [u8]),
    Recv(&'a mut [u8]),
}

impl BroadcastBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            BroadcastBuffer::Send(b) => b.len(),
            BroadcastBuffer::Recv(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait CollectiveBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether tensors on `device` can be handed to this backend directly.
    fn supports_device(&self, device: DeviceId) -> bool;

    /// Sum `count` elements of `dtype` across all ranks into `recvbuf`.
    ///
    /// With `sendbuf == None` the reduction runs in place on `recvbuf`.
    fn allreduce(
        &self,
        entries: &[TensorEntry],
        sendbuf: Option<&[u8]>,
        recvbuf: &mut [u8],
        count: usize,
        dtype: DataType,
    ) -> Result<()>;

    /// Variable-size allgather. Rank `r` contributes `recvcounts[r]`
    /// elements, which land at element offset `displacements[r]` of
    /// `recvbuf` on every rank.
    ///
    /// The backend only fills the flat buffer. Scattering each
    /// `(entry, rank)` block into the entries' outputs is done by the engine
    /// from its `GatherLayout`.
    ///
    /// With `sendbuf == None` this rank's block is already in place inside
    /// `recvbuf`.
    fn allgatherv(
        &self,
        entries: &[TensorEntry],
        sendbuf: Option<&[u8]>,
        recvbuf: &mut [u8],
        recvcounts: &[usize],
        displacements: &[usize],
        element_size: usize,
    ) -> Result<()>;

    /// Copy `count` elements from `root` to every other rank.
    fn broadcast(
        &self,
        entries: &[TensorEntry],
        buffer: BroadcastBuffer<'_>,
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> Result<()>;

    /// Withdraw this rank from the collective it was about to join.
    ///
    /// Takes the place of exactly one primitive call. Peers blocked on this
    /// rank for that call must fail rather than wait, and anything they
    /// sent for it must not leak into a later call.
    fn abort(&self, operation: &'static str) -> Result<()>;
}
