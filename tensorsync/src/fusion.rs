//! Reusable fusion buffers keyed by `(device, framework)`.
//!
//! Each key owns exactly one scratch region for the lifetime of the
//! process. An operation checks it out for the duration of a single batch
//! through a [`FusionBuffer`] guard; dropping the guard hands the region
//! back so the next batch reuses the same allocation.

use crate::config::TensorSyncConfig;
use crate::error::{Result, TensorSyncError};
use crate::types::{DeviceId, Framework};
use crossbeam_queue::ArrayQueue;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type SlotKey = (DeviceId, Framework);

/// One key's buffer, parked in the queue while no guard holds it.
struct Slot {
    buffer: ArrayQueue<Vec<u8>>,
    /// Reserved bytes as of the last release.
    capacity: AtomicUsize,
}

/// Owner of every fusion buffer in the process.
pub struct FusionBufferManager {
    initial_capacity: usize,
    slots: Mutex<HashMap<SlotKey, Arc<Slot>>>,
}

impl FusionBufferManager {
    /// Buffers start with `initial_capacity` bytes reserved and grow on demand.
    pub fn new(initial_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            initial_capacity,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &TensorSyncConfig) -> Arc<Self> {
        Self::new(config.fusion_buffer_capacity_bytes)
    }

    /// Check out the buffer for `(device, framework)`, sized to `len` bytes.
    ///
    /// Contents are zeroed. Fails with `FusionBufferBusy` if a previous
    /// guard for the same key is still alive.
    pub fn acquire(
        self: &Arc<Self>,
        device: DeviceId,
        framework: Framework,
        len: usize,
    ) -> Result<FusionBuffer> {
        let slot = self.slot((device, framework))?;
        let mut buf = slot.buffer.pop().ok_or_else(|| TensorSyncError::FusionBufferBusy {
            device,
            framework: framework.to_string(),
        })?;

        if len > buf.capacity() {
            tracing::debug!(
                device,
                %framework,
                from = buf.capacity(),
                to = len,
                "growing fusion buffer"
            );
        }
        buf.clear();
        buf.resize(len, 0);

        Ok(FusionBuffer {
            buf: Some(buf),
            slot,
        })
    }

    /// Reserved bytes of the buffer for a key as of its last release, or
    /// `None` if the key has never been used.
    pub fn capacity(&self, device: DeviceId, framework: Framework) -> Option<usize> {
        let slots = self.slots.lock().ok()?;
        let slot = slots.get(&(device, framework))?;
        Some(slot.capacity.load(Ordering::Acquire))
    }

    fn slot(&self, key: SlotKey) -> Result<Arc<Slot>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| TensorSyncError::LockPoisoned("fusion buffers"))?;
        let slot = slots.entry(key).or_insert_with(|| {
            let buf = Vec::with_capacity(self.initial_capacity);
            let capacity = AtomicUsize::new(buf.capacity());
            let buffer = ArrayQueue::new(1);
            let _ = buffer.push(buf);
            Arc::new(Slot { buffer, capacity })
        });
        Ok(Arc::clone(slot))
    }
}

/// A checked-out fusion buffer. Derefs to `[u8]`.
pub struct FusionBuffer {
    buf: Option<Vec<u8>>,
    slot: Arc<Slot>,
}

impl Deref for FusionBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Invariant: `buf` is `Some` from construction until `Drop`.
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for FusionBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for FusionBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.slot.capacity.store(buf.capacity(), Ordering::Release);
            let _ = self.slot.buffer.push(buf);
        }
    }
}

/// Byte ranges of each entry inside a fused buffer.
///
/// Entries are packed back to back in batch order with no padding. The same
/// layout must drive both the copy into and the copy out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionLayout {
    ranges: Vec<Range<usize>>,
}

impl FusionLayout {
    pub fn from_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut offset = 0;
        let ranges = sizes
            .into_iter()
            .map(|len| {
                let r = offset..offset + len;
                offset += len;
                r
            })
            .collect();
        Self { ranges }
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Total fused length in bytes.
    pub fn total_len(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }
}
