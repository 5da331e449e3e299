//! The operation variants that execute one negotiated batch.
//!
//! Each variant runs synchronously: `execute` returns only once packing,
//! the single backend call and unpacking are all done. Every rank must run
//! the same variants in the same order with identically batched entries.

mod allgather;
mod allreduce;
mod broadcast;
mod failure;
mod layout;
mod manager;

pub use allgather::GatherOperation;
pub use allreduce::ReduceOperation;
pub use broadcast::BroadcastOperation;
pub use failure::FailureOperation;
pub use layout::GatherLayout;
pub use manager::OperationManager;

use crate::backend::CollectiveBackend;
use crate::config::TensorSyncConfig;
use crate::entry::TensorEntry;
use crate::error::{Result, Status, TensorSyncError};
use crate::response::Response;
use crate::types::DataType;

/// Capability set shared by every operation variant.
pub trait CollectiveOp: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the batch. All entries observe the returned status.
    fn execute(&self, entries: &mut [TensorEntry], response: &Response) -> Status;

    /// Whether this variant can run the batch at all. Consulted by the
    /// scheduler before dispatch.
    fn enabled(
        &self,
        params: &TensorSyncConfig,
        entries: &[TensorEntry],
        response: &Response,
    ) -> bool;
}

/// The shared dtype of a non-empty batch.
pub(crate) fn batch_dtype(entries: &[TensorEntry], operation: &'static str) -> Result<DataType> {
    let first = entries.first().ok_or(TensorSyncError::InvalidBatch {
        operation,
        expected: 1,
        actual: 0,
    })?;
    let dtype = first.tensor.dtype();
    if let Some(other) = entries.iter().find(|e| e.tensor.dtype() != dtype) {
        return Err(TensorSyncError::MixedDType {
            first: dtype,
            other: other.tensor.dtype(),
        });
    }
    Ok(dtype)
}

/// Pass through the outcome of the checks that precede a backend call.
///
/// A failure is local to this rank, so the backend is told to withdraw it
/// from the collective its peers are about to run.
pub(crate) fn or_abort<T>(
    backend: &dyn CollectiveBackend,
    operation: &'static str,
    checked: Result<T>,
) -> Result<T> {
    if checked.is_err()
        && let Err(e) = backend.abort(operation)
    {
        tracing::debug!(operation, error = %e, "abort did not reach every peer");
    }
    checked
}

pub(crate) fn expect_single(entries: &[TensorEntry], operation: &'static str) -> Result<()> {
    if entries.len() != 1 {
        return Err(TensorSyncError::InvalidBatch {
            operation,
            expected: 1,
            actual: entries.len(),
        });
    }
    Ok(())
}
