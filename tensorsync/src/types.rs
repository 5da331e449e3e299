/// Rank of a participant in the run (0-indexed).
pub type Rank = u32;

/// Device a tensor lives on. Host memory uses [`CPU_DEVICE_ID`].
pub type DeviceId = i32;

/// Device id reserved for host (CPU) memory.
pub const CPU_DEVICE_ID: DeviceId = -1;

/// Element types a tensor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I8 = 4,
    I32 = 5,
    I64 = 6,
    U8 = 7,
    U32 = 8,
    U64 = 9,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The ML runtime that owns a tensor.
///
/// Fusion buffers are keyed by `(DeviceId, Framework)` because each runtime
/// hands out its own device allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framework {
    /// Plain host buffers owned by this crate (tests, simulations).
    Native,
    TensorFlow,
    PyTorch,
    MXNet,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framework::Native => f.write_str("native"),
            Framework::TensorFlow => f.write_str("tensorflow"),
            Framework::PyTorch => f.write_str("pytorch"),
            Framework::MXNet => f.write_str("mxnet"),
        }
    }
}
