pub mod backend;
pub mod collective;
pub mod config;
pub mod entry;
pub mod error;
pub mod fusion;
mod reduce;
pub mod response;
pub mod state;
pub mod tensor;
pub mod timeline;
pub mod types;

pub use backend::{BroadcastBuffer, CollectiveBackend, LocalBackend, LocalMesh};
pub use collective::{
    BroadcastOperation, CollectiveOp, FailureOperation, GatherLayout, GatherOperation,
    OperationManager, ReduceOperation,
};
pub use config::TensorSyncConfig;
pub use entry::{StatusCallback, TensorEntry};
pub use error::{ErrorKind, Result, Status, TensorSyncError};
pub use fusion::{FusionBuffer, FusionBufferManager, FusionLayout};
pub use response::{Response, ResponseType};
pub use state::RunState;
pub use tensor::{HostContext, HostTensor, OpContext, Tensor, TensorMut, TensorShape};
pub use timeline::{NoopTimeline, Timeline, TracingTimeline};
pub use types::{CPU_DEVICE_ID, DataType, DeviceId, Framework, Rank};
