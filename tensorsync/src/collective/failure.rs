use super::CollectiveOp;
use crate::config::TensorSyncConfig;
use crate::entry::TensorEntry;
use crate::error::{Status, TensorSyncError};
use crate::response::Response;

/// Turns a coordinator-detected inconsistency into a batch status.
///
/// Never touches a backend; the status carries the response's error
/// message verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureOperation;

impl FailureOperation {
    pub fn new() -> Self {
        Self
    }
}

impl CollectiveOp for FailureOperation {
    fn name(&self) -> &'static str {
        "error"
    }

    fn execute(&self, _entries: &mut [TensorEntry], response: &Response) -> Status {
        Err(TensorSyncError::precondition(response.error_message()))
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
