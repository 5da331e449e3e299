use super::{CollectiveOp, expect_single, or_abort};
use crate::backend::{BroadcastBuffer, CollectiveBackend};
use crate::config::TensorSyncConfig;
use crate::entry::TensorEntry;
use crate::error::{Result, Status, TensorSyncError};
use crate::response::Response;
use crate::state::RunState;
use crate::timeline::BROADCAST;
use crate::types::Rank;
use std::sync::Arc;

/// Copy the root rank's input into every rank's output. Never batched.
///
/// Each rank picks its role by comparing the entry's root rank with its own.
/// The root's input is only read; when the root also has an output it
/// receives a copy so every rank ends with the same value.
pub struct BroadcastOperation {
    state: Arc<RunState>,
    backend: Arc<dyn CollectiveBackend>,
}

impl BroadcastOperation {
    pub fn new(state: Arc<RunState>, backend: Arc<dyn CollectiveBackend>) -> Self {
        Self { state, backend }
    }

    /// Checks that precede the collective. Returns the root rank.
    fn check(&self, entries: &[TensorEntry]) -> Result<Rank> {
        expect_single(entries, "broadcast")?;
        let entry = &entries[0];
        let root = entry.root_rank;
        let world_size = self.state.world_size();
        if root >= world_size {
            return Err(TensorSyncError::InvalidRank {
                rank: root,
                world_size,
            });
        }

        let output = entry.output();
        if output.is_none() && root != self.state.rank() {
            return Err(TensorSyncError::MissingOutput {
                name: entry.name.clone(),
            });
        }
        if let Some(out) = output
            && out.size() != entry.tensor.size()
        {
            return Err(TensorSyncError::BufferSizeMismatch {
                expected: entry.tensor.size(),
                actual: out.size(),
            });
        }
        Ok(root)
    }
}

impl CollectiveOp for BroadcastOperation {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn execute(&self, entries: &mut [TensorEntry], _response: &Response) -> Status {
        let checked = self.check(entries);
        let root = or_abort(self.backend.as_ref(), self.name(), checked)?;

        let input = Arc::clone(&entries[0].tensor);
        let count = input.shape().num_elements();
        let dtype = input.dtype();
        let timeline = self.state.timeline();

        if self.state.rank() == root {
            timeline.activity_start_all(entries, BROADCAST);
            let sent = self.backend.broadcast(
                entries,
                BroadcastBuffer::Send(input.data()),
                count,
                dtype,
                root,
            );
            timeline.activity_end_all(entries);
            sent?;

            if let Some(out) = entries[0].output.as_deref_mut() {
                out.data_mut().copy_from_slice(input.data());
            }
            Ok(())
        } else {
            let mut output = entries[0].output.take().ok_or_else(|| {
                TensorSyncError::MissingOutput {
                    name: entries[0].name.clone(),
                }
            })?;

            timeline.activity_start_all(entries, BROADCAST);
            let received = self.backend.broadcast(
                entries,
                BroadcastBuffer::Recv(output.data_mut()),
                count,
                dtype,
                root,
            );
            timeline.activity_end_all(entries);

            entries[0].output = Some(output);
            received
        }
    }

    fn enabled(
        &self,
        _params: &TensorSyncConfig,
        _entries: &[TensorEntry],
        _response: &Response,
    ) -> bool {
        true
    }
}
