use crate::error::{Result, Status, TensorSyncError};
use crate::tensor::{OpContext, Tensor, TensorMut};
use crate::types::{CPU_DEVICE_ID, DeviceId, Framework, Rank};
use std::sync::Arc;

/// Invoked once with the batch status after the entry's operation finishes.
pub type StatusCallback = Box<dyn FnOnce(&Status) + Send>;

/// One rank's contribution to one logical operation within a batch.
pub struct TensorEntry {
    pub name: String,
    /// Input tensor. Never written by the engine.
    pub tensor: Arc<dyn Tensor>,
    /// Output destination. Allgather allocates it; the other operations
    /// expect it to be present already.
    pub output: Option<Box<dyn TensorMut>>,
    pub context: Arc<dyn OpContext>,
    pub device: DeviceId,
    /// Source rank for broadcast. Ignored by the other operations.
    pub root_rank: Rank,
    pub callback: Option<StatusCallback>,
}

impl TensorEntry {
    /// Host-resident entry with no output and root rank 0.
    pub fn new(
        name: impl Into<String>,
        tensor: Arc<dyn Tensor>,
        context: Arc<dyn OpContext>,
    ) -> Self {
        Self {
            name: name.into(),
            tensor,
            output: None,
            context,
            device: CPU_DEVICE_ID,
            root_rank: 0,
            callback: None,
        }
    }

    pub fn with_output(mut self, output: Box<dyn TensorMut>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn with_root_rank(mut self, root_rank: Rank) -> Self {
        self.root_rank = root_rank;
        self
    }

    pub fn with_callback(mut self, callback: impl FnOnce(&Status) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn framework(&self) -> Framework {
        self.context.framework()
    }

    pub fn output(&self) -> Option<&dyn TensorMut> {
        self.output.as_deref()
    }

    pub fn output_mut(&mut self) -> Result<&mut dyn TensorMut> {
        match self.output.as_deref_mut() {
            Some(out) => Ok(out),
            None => Err(TensorSyncError::MissingOutput {
                name: self.name.clone(),
            }),
        }
    }

    /// Fire the completion callback, if any. Later calls are no-ops.
    pub fn complete(&mut self, status: &Status) {
        if let Some(cb) = self.callback.take() {
            cb(status);
        }
    }
}

impl std::fmt::Debug for TensorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorEntry")
            .field("name", &self.name)
            .field("dtype", &self.tensor.dtype())
            .field("shape", self.tensor.shape())
            .field("has_output", &self.output.is_some())
            .field("device", &self.device)
            .field("root_rank", &self.root_rank)
            .finish()
    }
}
