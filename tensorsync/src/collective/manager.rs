use super::{
    BroadcastOperation, CollectiveOp, FailureOperation, GatherOperation, ReduceOperation,
    or_abort,
};
use crate::backend::CollectiveBackend;
use crate::entry::TensorEntry;
use crate::error::{Status, TensorSyncError};
use crate::response::{Response, ResponseType};
use crate::state::RunState;
use std::sync::Arc;

/// Routes a negotiated batch to its operation and reports the outcome to
/// every entry.
pub struct OperationManager {
    state: Arc<RunState>,
    backend: Arc<dyn CollectiveBackend>,
    reduce: ReduceOperation,
    gather: GatherOperation,
    broadcast: BroadcastOperation,
    failure: FailureOperation,
}

impl OperationManager {
    pub fn new(state: Arc<RunState>, backend: Arc<dyn CollectiveBackend>) -> Self {
        Self {
            reduce: ReduceOperation::new(Arc::clone(&state), Arc::clone(&backend)),
            gather: GatherOperation::new(Arc::clone(&state), Arc::clone(&backend)),
            broadcast: BroadcastOperation::new(Arc::clone(&state), Arc::clone(&backend)),
            failure: FailureOperation::new(),
            state,
            backend,
        }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// The variant that handles `response_type`.
    pub fn operation(&self, response_type: ResponseType) -> &dyn CollectiveOp {
        match response_type {
            ResponseType::Allreduce => &self.reduce,
            ResponseType::Allgather => &self.gather,
            ResponseType::Broadcast => &self.broadcast,
            ResponseType::Error => &self.failure,
        }
    }

    /// Execute one batch and hand the resulting status to every entry's
    /// callback. The same status is returned.
    pub fn execute_operation(&self, entries: &mut [TensorEntry], response: &Response) -> Status {
        let op = self.operation(response.response_type());
        let status = if op.enabled(self.state.config(), entries, response) {
            op.execute(entries, response)
        } else {
            let disabled: Status = Err(TensorSyncError::NoEnabledOperation {
                operation: op.name(),
            });
            or_abort(self.backend.as_ref(), op.name(), disabled)
        };

        if let Err(e) = &status {
            tracing::warn!(
                rank = self.state.rank(),
                operation = op.name(),
                entries = entries.len(),
                error = %e,
                "collective batch failed"
            );
        }
        for e in entries.iter_mut() {
            e.complete(&status);
        }
        status
    }
}
