//! Coordinator-computed metadata for one batch.

/// Which collective the coordinator scheduled for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Allreduce,
    Allgather,
    Broadcast,
    Error,
}

impl ResponseType {
    pub const fn name(self) -> &'static str {
        match self {
            ResponseType::Allreduce => "allreduce",
            ResponseType::Allgather => "allgather",
            ResponseType::Broadcast => "broadcast",
            ResponseType::Error => "error",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable per-batch metadata.
///
/// For allgather, `tensor_sizes` holds the first-dimension size every rank
/// contributes for every entry, laid out entry-major, rank-minor:
/// `tensor_sizes[entry * world_size + rank]`. Ranks that contribute no rows
/// must still be present with size 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    response_type: ResponseType,
    tensor_names: Vec<String>,
    tensor_sizes: Vec<usize>,
    error_message: String,
}

impl Response {
    fn new(response_type: ResponseType, tensor_names: Vec<String>) -> Self {
        Self {
            response_type,
            tensor_names,
            tensor_sizes: Vec::new(),
            error_message: String::new(),
        }
    }

    pub fn allreduce(tensor_names: Vec<String>) -> Self {
        Self::new(ResponseType::Allreduce, tensor_names)
    }

    pub fn allgather(tensor_names: Vec<String>, tensor_sizes: Vec<usize>) -> Self {
        Self {
            tensor_sizes,
            ..Self::new(ResponseType::Allgather, tensor_names)
        }
    }

    pub fn broadcast(tensor_name: impl Into<String>) -> Self {
        Self::new(ResponseType::Broadcast, vec![tensor_name.into()])
    }

    pub fn error(tensor_names: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            ..Self::new(ResponseType::Error, tensor_names)
        }
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn tensor_names(&self) -> &[String] {
        &self.tensor_names
    }

    pub fn tensor_sizes(&self) -> &[usize] {
        &self.tensor_sizes
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}
