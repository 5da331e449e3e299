//! In-process loopback backend.
//!
//! `LocalMesh::build(n)` wires `n` backends together with one unbounded
//! channel per ordered pair of ranks. Each backend is meant to be driven
//! from its own thread; the collectives block on `blocking_recv` until the
//! matching peers have sent. Dropping a backend disconnects it, which turns
//! any peer still waiting on it into a `CollectiveFailed` error instead of
//! a hang.
//!
//! Every frame is labelled with the operation and the sender's call number.
//! Each primitive or [`CollectiveBackend::abort`] consumes one call number,
//! so all ranks agree on it as long as they make the same sequence of
//! calls. A receiver drops frames left over from calls it abandoned and
//! fails on anything else that does not match.

use super::{BroadcastBuffer, CollectiveBackend};
use crate::entry::TensorEntry;
use crate::error::{Result, TensorSyncError};
use crate::reduce::sum_into;
use crate::types::{CPU_DEVICE_ID, DataType, DeviceId, Rank};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Payload {
    Data(Vec<u8>),
    Abort,
}

#[derive(Debug)]
struct Frame {
    seq: u64,
    operation: &'static str,
    payload: Payload,
}

/// Factory for a fully connected set of [`LocalBackend`]s.
pub struct LocalMesh;

impl LocalMesh {
    /// One backend per rank, indexed by rank.
    pub fn build(world_size: u32) -> Vec<LocalBackend> {
        let n = world_size as usize;
        let mut senders: Vec<Vec<Option<mpsc::UnboundedSender<Frame>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        let mut inboxes: Vec<Vec<Option<Mutex<mpsc::UnboundedReceiver<Frame>>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();

        for src in 0..n {
            for dst in 0..n {
                if src == dst {
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                senders[src][dst] = Some(tx);
                inboxes[dst][src] = Some(Mutex::new(rx));
            }
        }

        senders
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (peers, inbox))| LocalBackend {
                rank: rank as Rank,
                world_size,
                calls: AtomicU64::new(0),
                peers,
                inbox,
            })
            .collect()
    }
}

/// One rank's end of a [`LocalMesh`]. Host memory only.
pub struct LocalBackend {
    rank: Rank,
    world_size: u32,
    /// Number of collective calls (including aborts) made so far.
    calls: AtomicU64,
    /// Indexed by destination rank; `None` for self.
    peers: Vec<Option<mpsc::UnboundedSender<Frame>>>,
    /// Indexed by source rank; `None` for self.
    inbox: Vec<Option<Mutex<mpsc::UnboundedReceiver<Frame>>>>,
}

impl LocalBackend {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    fn others(&self) -> impl Iterator<Item = Rank> + '_ {
        (0..self.world_size).filter(move |&r| r != self.rank)
    }

    fn next_call(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, dest: Rank, frame: Frame) -> Result<()> {
        let operation = frame.operation;
        let tx = self
            .peers
            .get(dest as usize)
            .and_then(Option::as_ref)
            .ok_or(TensorSyncError::InvalidRank {
                rank: dest,
                world_size: self.world_size,
            })?;
        tx.send(frame).map_err(|_| TensorSyncError::CollectiveFailed {
            operation,
            rank: dest,
            reason: "peer disconnected".into(),
        })
    }

    fn send_data(
        &self,
        dest: Rank,
        seq: u64,
        operation: &'static str,
        data: Vec<u8>,
    ) -> Result<()> {
        self.send(
            dest,
            Frame {
                seq,
                operation,
                payload: Payload::Data(data),
            },
        )
    }

    /// Tell every peer this rank will not take part in call `seq`.
    fn send_abort(&self, seq: u64, operation: &'static str) -> Result<()> {
        let mut first_err = None;
        for peer in self.others() {
            let frame = Frame {
                seq,
                operation,
                payload: Payload::Abort,
            };
            // Keep notifying the remaining peers past a disconnected one.
            if let Err(e) = self.send(peer, frame) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Pass `checked` through, aborting call `seq` on the peers if it failed.
    fn or_abort<T>(&self, seq: u64, operation: &'static str, checked: Result<T>) -> Result<T> {
        if checked.is_err() {
            let _ = self.send_abort(seq, operation);
        }
        checked
    }

    fn recv(
        &self,
        src: Rank,
        seq: u64,
        expected: usize,
        operation: &'static str,
    ) -> Result<Vec<u8>> {
        let rx = self
            .inbox
            .get(src as usize)
            .and_then(Option::as_ref)
            .ok_or(TensorSyncError::InvalidRank {
                rank: src,
                world_size: self.world_size,
            })?;
        let mut rx = rx
            .lock()
            .map_err(|_| TensorSyncError::LockPoisoned("local inbox"))?;
        let failed = |reason: String| TensorSyncError::CollectiveFailed {
            operation,
            rank: src,
            reason,
        };

        loop {
            let frame = rx
                .blocking_recv()
                .ok_or_else(|| failed("peer disconnected".into()))?;
            if frame.seq < seq {
                tracing::debug!(
                    rank = self.rank,
                    src,
                    stale = frame.seq,
                    current = seq,
                    "dropping frame from an abandoned call"
                );
                continue;
            }
            if frame.seq != seq || frame.operation != operation {
                return Err(failed(format!(
                    "out of sequence: expected {operation} #{seq}, got {} #{}",
                    frame.operation, frame.seq
                )));
            }
            return match frame.payload {
                Payload::Abort => Err(failed("peer aborted the call".into())),
                Payload::Data(data) if data.len() != expected => {
                    Err(TensorSyncError::BufferSizeMismatch {
                        expected,
                        actual: data.len(),
                    })
                }
                Payload::Data(data) => Ok(data),
            };
        }
    }

    /// Validate allgatherv arguments; returns this rank's byte range.
    fn check_gather_args(
        rank: usize,
        world: usize,
        sendbuf: Option<&[u8]>,
        recv_len: usize,
        recvcounts: &[usize],
        displacements: &[usize],
        element_size: usize,
    ) -> Result<std::ops::Range<usize>> {
        if recvcounts.len() != world || displacements.len() != world {
            return Err(TensorSyncError::InvalidResponse {
                expected: world,
                actual: recvcounts.len().min(displacements.len()),
            });
        }
        let needed = (0..world)
            .map(|r| (displacements[r] + recvcounts[r]) * element_size)
            .max()
            .unwrap_or(0);
        if recv_len < needed {
            return Err(TensorSyncError::BufferSizeMismatch {
                expected: needed,
                actual: recv_len,
            });
        }
        let start = displacements[rank] * element_size;
        let own = start..start + recvcounts[rank] * element_size;
        if let Some(send) = sendbuf
            && send.len() != own.len()
        {
            return Err(TensorSyncError::BufferSizeMismatch {
                expected: own.len(),
                actual: send.len(),
            });
        }
        Ok(own)
    }
}

impl CollectiveBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports_device(&self, device: DeviceId) -> bool {
        device == CPU_DEVICE_ID
    }

    fn allreduce(
        &self,
        _entries: &[TensorEntry],
        sendbuf: Option<&[u8]>,
        recvbuf: &mut [u8],
        count: usize,
        dtype: DataType,
    ) -> Result<()> {
        const OP: &str = "allreduce";
        let seq = self.next_call();
        let bytes = count * dtype.size_in_bytes();
        let own = sendbuf.unwrap_or(&*recvbuf).to_vec();
        let checked = if own.len() != bytes || recvbuf.len() != bytes {
            Err(TensorSyncError::BufferSizeMismatch {
                expected: bytes,
                actual: own.len().min(recvbuf.len()),
            })
        } else {
            Ok(())
        };
        self.or_abort(seq, OP, checked)?;

        for peer in self.others() {
            self.send_data(peer, seq, OP, own.clone())?;
        }

        // Accumulate in rank order so every rank rounds identically.
        let mut acc: Option<Vec<u8>> = None;
        for r in 0..self.world_size {
            let contribution = if r == self.rank {
                own.clone()
            } else {
                self.recv(r, seq, bytes, OP)?
            };
            match acc.as_mut() {
                None => acc = Some(contribution),
                Some(sum) => sum_into(sum, &contribution, dtype)?,
            }
        }

        if let Some(sum) = acc {
            recvbuf.copy_from_slice(&sum);
        }
        Ok(())
    }

    fn allgatherv(
        &self,
        _entries: &[TensorEntry],
        sendbuf: Option<&[u8]>,
        recvbuf: &mut [u8],
        recvcounts: &[usize],
        displacements: &[usize],
        element_size: usize,
    ) -> Result<()> {
        const OP: &str = "allgather";
        let seq = self.next_call();
        let world = self.world_size as usize;
        let block = |r: usize| {
            let start = displacements[r] * element_size;
            start..start + recvcounts[r] * element_size
        };
        let checked = Self::check_gather_args(
            self.rank as usize,
            world,
            sendbuf,
            recvbuf.len(),
            recvcounts,
            displacements,
            element_size,
        );
        let own_range = self.or_abort(seq, OP, checked)?;
        if let Some(send) = sendbuf {
            recvbuf[own_range.clone()].copy_from_slice(send);
        }

        let own = recvbuf[own_range].to_vec();
        for peer in self.others() {
            self.send_data(peer, seq, OP, own.clone())?;
        }
        for peer in self.others() {
            let range = block(peer as usize);
            let data = self.recv(peer, seq, range.len(), OP)?;
            recvbuf[range].copy_from_slice(&data);
        }
        Ok(())
    }

    fn broadcast(
        &self,
        _entries: &[TensorEntry],
        buffer: BroadcastBuffer<'_>,
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> Result<()> {
        const OP: &str = "broadcast";
        let seq = self.next_call();
        let bytes = count * dtype.size_in_bytes();
        let checked = if root >= self.world_size {
            Err(TensorSyncError::InvalidRank {
                rank: root,
                world_size: self.world_size,
            })
        } else if buffer.len() != bytes {
            Err(TensorSyncError::BufferSizeMismatch {
                expected: bytes,
                actual: buffer.len(),
            })
        } else {
            Ok(())
        };
        self.or_abort(seq, OP, checked)?;

        match buffer {
            BroadcastBuffer::Send(data) => {
                for peer in self.others() {
                    self.send_data(peer, seq, OP, data.to_vec())?;
                }
            }
            BroadcastBuffer::Recv(dst) => {
                let data = self.recv(root, seq, bytes, OP)?;
                dst.copy_from_slice(&data);
            }
        }
        Ok(())
    }

    fn abort(&self, operation: &'static str) -> Result<()> {
        let seq = self.next_call();
        tracing::debug!(rank = self.rank, operation, seq, "aborting collective call");
        self.send_abort(seq, operation)
    }
}
