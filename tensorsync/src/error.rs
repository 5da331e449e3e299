use crate::types::{DataType, DeviceId, Rank};

pub type Result<T> = std::result::Result<T, TensorSyncError>;

/// Outcome of one batch. Every entry of the batch observes the same value.
pub type Status = Result<()>;

/// Coarse classification of a [`TensorSyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An output tensor could not be sized or allocated.
    Allocation,
    /// The collective primitive reported a failure.
    Transport,
    /// The coordinator found the batch inconsistent across ranks.
    Precondition,
    /// The batch or response handed to an operation is malformed.
    InvalidArgument,
    /// A shared resource (fusion buffer) is unavailable.
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorSyncError {
    #[error("failed to allocate output for {name}: {reason}")]
    Allocation { name: String, reason: String },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// Message is passed through untouched from the coordinator.
    #[error("{message}")]
    Precondition { message: String },

    #[error("unsupported data type: {dtype:?} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("{operation} expects {expected} entries, got {actual}")]
    InvalidBatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("mixed data types in batch: {first} and {other}")]
    MixedDType { first: DataType, other: DataType },

    #[error("invalid response: expected {expected} tensor sizes, got {actual}")]
    InvalidResponse { expected: usize, actual: usize },

    #[error("entry {name} has no output tensor")]
    MissingOutput { name: String },

    #[error("no enabled operation for {operation}")]
    NoEnabledOperation { operation: &'static str },

    #[error("fusion buffer for device {device} ({framework}) is already in use")]
    FusionBufferBusy {
        device: DeviceId,
        framework: String,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl TensorSyncError {
    /// Create a `Transport` error from any message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a `Precondition` error carrying the coordinator's message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Allocation { .. } => ErrorKind::Allocation,
            Self::CollectiveFailed { .. } | Self::Transport(_) => ErrorKind::Transport,
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::FusionBufferBusy { .. } | Self::LockPoisoned(_) => ErrorKind::Resource,
            Self::UnsupportedDType { .. }
            | Self::BufferSizeMismatch { .. }
            | Self::InvalidRank { .. }
            | Self::InvalidBatch { .. }
            | Self::MixedDType { .. }
            | Self::InvalidResponse { .. }
            | Self::MissingOutput { .. }
            | Self::NoEnabledOperation { .. } => ErrorKind::InvalidArgument,
        }
    }
}
