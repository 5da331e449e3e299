use super::{CollectiveOp, batch_dtype, or_abort};
use crate::backend::CollectiveBackend;
use crate::config::TensorSyncConfig;
use crate::entry::TensorEntry;
use crate::error::{Status, TensorSyncError};
use crate::fusion::FusionLayout;
use crate::response::Response;
use crate::state::RunState;
use crate::timeline::{ALLREDUCE, MEMCPY_IN_FUSION_BUFFER, MEMCPY_OUT_FUSION_BUFFER};
use std::sync::Arc;

/// Sum-reduce every entry across all ranks.
///
/// Batches of more than one entry are packed back to back into the fusion
/// buffer and reduced with a single backend call. A lone entry is reduced
/// straight from its input into its output.
pub struct ReduceOperation {
    state: Arc<RunState>,
    backend: Arc<dyn CollectiveBackend>,
}

impl ReduceOperation {
    pub fn new(state: Arc<RunState>, backend: Arc<dyn CollectiveBackend>) -> Self {
        Self { state, backend }
    }

    /// Total element count across the batch.
    pub fn num_elements(entries: &[TensorEntry]) -> usize {
        entries
            .iter()
            .map(|e| e.tensor.shape().num_elements())
            .sum()
    }

    /// Byte layout of the batch inside the fusion buffer.
    pub fn fusion_layout(entries: &[TensorEntry]) -> FusionLayout {
        FusionLayout::from_sizes(entries.iter().map(|e| e.tensor.size()))
    }

    /// Copy every input into its range of `buffer`.
    pub fn memcpy_in_fusion_buffer(
        entries: &[TensorEntry],
        layout: &FusionLayout,
        buffer: &mut [u8],
    ) {
        for (e, range) in entries.iter().zip(layout.ranges()) {
            buffer[range.clone()].copy_from_slice(e.tensor.data());
        }
    }

    /// Copy each entry's range of `buffer` into its output.
    pub fn memcpy_out_fusion_buffer(
        entries: &mut [TensorEntry],
        layout: &FusionLayout,
        buffer: &[u8],
    ) -> Status {
        for (e, range) in entries.iter_mut().zip(layout.ranges()) {
            e.output_mut()?.data_mut().copy_from_slice(&buffer[range.clone()]);
        }
        Ok(())
    }

    /// Every entry needs an output exactly as large as its input.
    fn check_outputs(entries: &[TensorEntry]) -> Status {
        for e in entries {
            let out = e.output().ok_or_else(|| TensorSyncError::MissingOutput {
                name: e.name.clone(),
            })?;
            if out.size() != e.tensor.size() {
                return Err(TensorSyncError::BufferSizeMismatch {
                    expected: e.tensor.size(),
                    actual: out.size(),
                });
            }
        }
        Ok(())
    }
}

impl CollectiveOp for ReduceOperation {
    fn name(&self) -> &'static str {
        "allreduce"
    }

    fn execute(&self, entries: &mut [TensorEntry], _response: &Response) -> Status {
        let backend = self.backend.as_ref();
        let checked = batch_dtype(entries, self.name())
            .and_then(|dtype| Self::check_outputs(entries).map(|()| dtype));
        let dtype = or_abort(backend, self.name(), checked)?;
        let count = Self::num_elements(entries);
        let timeline = self.state.timeline();

        if entries.len() > 1 {
            let layout = Self::fusion_layout(entries);
            let first = &entries[0];
            let acquired = self.state.fusion_buffers().acquire(
                first.device,
                first.framework(),
                layout.total_len(),
            );
            let mut buffer = or_abort(backend, self.name(), acquired)?;
            tracing::debug!(
                rank = self.state.rank(),
                entries = entries.len(),
                bytes = layout.total_len(),
                "fused allreduce"
            );

            timeline.activity_start_all(entries, MEMCPY_IN_FUSION_BUFFER);
            Self::memcpy_in_fusion_buffer(entries, &layout, &mut buffer);
            timeline.activity_end_all(entries);

            timeline.activity_start_all(entries, ALLREDUCE);
            let reduced = backend.allreduce(entries, None, &mut buffer, count, dtype);
            timeline.activity_end_all(entries);
            reduced?;

            timeline.activity_start_all(entries, MEMCPY_OUT_FUSION_BUFFER);
            let copied = Self::memcpy_out_fusion_buffer(entries, &layout, &buffer);
            timeline.activity_end_all(entries);
            copied
        } else {
            let input = Arc::clone(&entries[0].tensor);
            let taken = entries[0]
                .output
                .take()
                .ok_or_else(|| TensorSyncError::MissingOutput {
                    name: entries[0].name.clone(),
                });
            let mut output = or_abort(backend, self.name(), taken)?;

            timeline.activity_start_all(entries, ALLREDUCE);
            let reduced = backend.allreduce(
                entries,
                Some(input.data()),
                output.data_mut(),
                count,
                dtype,
            );
            timeline.activity_end_all(entries);

            entries[0].output = Some(output);
            reduced
        }
    }

    fn enabled(
        &self,
        _params: &TensorSyncConfig,
        entries: &[TensorEntry],
        _response: &Response,
    ) -> bool {
        entries
            .iter()
            .all(|e| self.backend.supports_device(e.device))
    }
}
