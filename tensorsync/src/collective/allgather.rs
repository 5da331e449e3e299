use super::{CollectiveOp, GatherLayout, batch_dtype, or_abort};
use crate::backend::CollectiveBackend;
use crate::config::TensorSyncConfig;
use crate::entry::TensorEntry;
use crate::error::{Result, Status, TensorSyncError};
use crate::response::Response;
use crate::state::RunState;
use crate::tensor::{TensorMut, TensorShape};
use crate::timeline::{
    ALLGATHER, ALLOCATE_OUTPUT, MEMCPY_IN_FUSION_BUFFER, MEMCPY_OUT_FUSION_BUFFER,
};
use std::sync::Arc;

/// Concatenate every rank's input along the leading dimension.
///
/// Inputs may differ in leading dimension from rank to rank; the trailing
/// dimensions must agree. The coordinator supplies each rank's leading
/// dimension per entry through [`Response::tensor_sizes`].
pub struct GatherOperation {
    state: Arc<RunState>,
    backend: Arc<dyn CollectiveBackend>,
}

impl GatherOperation {
    pub fn new(state: Arc<RunState>, backend: Arc<dyn CollectiveBackend>) -> Self {
        Self { state, backend }
    }

    /// Compute the flat layout of the batch for this run's world size.
    pub fn layout(&self, entries: &[TensorEntry], response: &Response) -> Result<GatherLayout> {
        let slice_elements: Vec<usize> = entries
            .iter()
            .map(|e| e.tensor.shape().slice_shape().num_elements())
            .collect();
        GatherLayout::compute(
            &slice_elements,
            response.tensor_sizes(),
            self.state.world_size() as usize,
        )
    }

    /// Allocate every output up front. Nothing is assigned unless all
    /// allocations succeed.
    fn allocate_outputs(entries: &mut [TensorEntry], layout: &GatherLayout) -> Status {
        let mut outputs: Vec<Box<dyn TensorMut>> = Vec::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            let mut shape = TensorShape::scalar();
            shape.add_dim(layout.output_first_dim(i));
            shape.append_shape(&e.tensor.shape().slice_shape());
            outputs.push(e.context.allocate_output(&e.name, shape, e.tensor.dtype())?);
        }
        for (e, out) in entries.iter_mut().zip(outputs) {
            e.output = Some(out);
        }
        Ok(())
    }

    /// Checks and allocation that precede the collective: the layout, this
    /// rank's own input sizes against it, then every output.
    fn prepare(
        &self,
        entries: &mut [TensorEntry],
        response: &Response,
    ) -> Result<(GatherLayout, usize)> {
        let element_size = batch_dtype(entries, self.name())?.size_in_bytes();
        let rank = self.state.rank() as usize;
        let layout = self.layout(entries, response)?;

        for (i, e) in entries.iter().enumerate() {
            let expected = layout.component_size(i, rank) * element_size;
            if e.tensor.size() != expected {
                return Err(TensorSyncError::BufferSizeMismatch {
                    expected,
                    actual: e.tensor.size(),
                });
            }
        }

        let timeline = self.state.timeline();
        timeline.activity_start_all(entries, ALLOCATE_OUTPUT);
        let allocated = Self::allocate_outputs(entries, &layout);
        timeline.activity_end_all(entries);
        allocated?;
        Ok((layout, element_size))
    }

    fn gather_fused(
        &self,
        entries: &mut [TensorEntry],
        layout: &GatherLayout,
        element_size: usize,
    ) -> Status {
        let rank = self.state.rank() as usize;
        let timeline = self.state.timeline();
        let first = &entries[0];
        let acquired = self.state.fusion_buffers().acquire(
            first.device,
            first.framework(),
            layout.total_len() * element_size,
        );
        let mut buffer = or_abort(self.backend.as_ref(), self.name(), acquired)?;
        tracing::debug!(
            rank,
            entries = entries.len(),
            elements = layout.total_len(),
            "fused allgather"
        );

        timeline.activity_start_all(entries, MEMCPY_IN_FUSION_BUFFER);
        for (i, e) in entries.iter().enumerate() {
            let start = layout.absolute_offset(i, rank) * element_size;
            buffer[start..start + e.tensor.size()].copy_from_slice(e.tensor.data());
        }
        timeline.activity_end_all(entries);

        timeline.activity_start_all(entries, ALLGATHER);
        let gathered = self.backend.allgatherv(
            entries,
            None,
            &mut buffer,
            layout.recvcounts(),
            layout.displacements(),
            element_size,
        );
        timeline.activity_end_all(entries);
        gathered?;

        timeline.activity_start_all(entries, MEMCPY_OUT_FUSION_BUFFER);
        let copied = Self::memcpy_out(entries, layout, &buffer, element_size);
        timeline.activity_end_all(entries);
        copied
    }

    /// Scatter each `(entry, rank)` block of the flat buffer into the
    /// entry's output, in rank order.
    fn memcpy_out(
        entries: &mut [TensorEntry],
        layout: &GatherLayout,
        buffer: &[u8],
        element_size: usize,
    ) -> Status {
        for (i, e) in entries.iter_mut().enumerate() {
            let out = e.output_mut()?.data_mut();
            for r in 0..layout.world_size() {
                let len = layout.component_size(i, r) * element_size;
                let src = layout.absolute_offset(i, r) * element_size;
                let dst = layout.output_offset(i, r) * element_size;
                out[dst..dst + len].copy_from_slice(&buffer[src..src + len]);
            }
        }
        Ok(())
    }

    fn gather_single(
        &self,
        entries: &mut [TensorEntry],
        layout: &GatherLayout,
        element_size: usize,
    ) -> Status {
        let timeline = self.state.timeline();
        let input = Arc::clone(&entries[0].tensor);
        let taken = entries[0]
            .output
            .take()
            .ok_or_else(|| TensorSyncError::MissingOutput {
                name: entries[0].name.clone(),
            });
        let mut output = or_abort(self.backend.as_ref(), self.name(), taken)?;

        timeline.activity_start_all(entries, ALLGATHER);
        let gathered = self.backend.allgatherv(
            entries,
            Some(input.data()),
            output.data_mut(),
            layout.recvcounts(),
            layout.displacements(),
            element_size,
        );
        timeline.activity_end_all(entries);

        entries[0].output = Some(output);
        gathered
    }
}

impl CollectiveOp for GatherOperation {
    fn name(&self) -> &'static str {
        "allgather"
    }

    fn execute(&self, entries: &mut [TensorEntry], response: &Response) -> Status {
        let checked = self.prepare(entries, response);
        let (layout, element_size) = or_abort(self.backend.as_ref(), self.name(), checked)?;

        if entries.len() > 1 {
            self.gather_fused(entries, &layout, element_size)
        } else {
            self.gather_single(entries, &layout, element_size)
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
