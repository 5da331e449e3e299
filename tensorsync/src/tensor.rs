//! Tensor and context seams, plus a host-memory implementation.
//!
//! The engine only ever sees tensors as `(dtype, shape, bytes)`. Runtimes
//! plug in their own storage by implementing [`Tensor`], [`TensorMut`] and
//! [`OpContext`]; [`HostTensor`] and [`HostContext`] back plain host memory.

use crate::error::{Result, TensorSyncError};
use crate::types::{DataType, Framework};

// ── Shape ────────────────────────────────────────────────────────────

/// Ordered list of dimension sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Shape of a scalar.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_size(&self, idx: usize) -> usize {
        self.dims[idx]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }

    /// Product of all dimensions. A scalar has one element.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn add_dim(&mut self, size: usize) {
        self.dims.push(size);
    }

    pub fn append_shape(&mut self, other: &TensorShape) {
        self.dims.extend_from_slice(&other.dims);
    }

    /// Shape of one slice along the leading dimension: every dimension but
    /// the first.
    pub fn slice_shape(&self) -> TensorShape {
        Self {
            dims: self.dims.iter().skip(1).copied().collect(),
        }
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

// ── Tensor seams ─────────────────────────────────────────────────────

/// Read-only view of a tensor's storage.
pub trait Tensor: Send + Sync + std::fmt::Debug {
    fn dtype(&self) -> DataType;
    fn shape(&self) -> &TensorShape;
    fn data(&self) -> &[u8];

    /// Size of the tensor in bytes.
    fn size(&self) -> usize {
        self.data().len()
    }
}

/// A tensor whose storage the engine may write into.
pub trait TensorMut: Tensor {
    fn data_mut(&mut self) -> &mut [u8];
}

/// Runtime handle that owns an entry and allocates its outputs.
pub trait OpContext: Send + Sync {
    fn framework(&self) -> Framework;

    /// Allocate a zero-filled output tensor of the given shape.
    fn allocate_output(
        &self,
        name: &str,
        shape: TensorShape,
        dtype: DataType,
    ) -> Result<Box<dyn TensorMut>>;
}

// ── Element codec ────────────────────────────────────────────────────

/// Rust scalar types that map to a [`DataType`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_element!(
    f32 => F32, f64 => F64, i8 => I8, i32 => I32, i64 => I64,
    u8 => U8, u32 => U32, u64 => U64
);

/// Encode typed elements into little-endian bytes.
pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let size = T::DTYPE.size_in_bytes();
    let mut out = vec![0u8; values.len() * size];
    for (chunk, v) in out.chunks_exact_mut(size).zip(values) {
        v.write_le(chunk);
    }
    out
}

/// Decode little-endian bytes into typed elements. Trailing bytes that do
/// not fill a whole element are ignored.
pub fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::DTYPE.size_in_bytes())
        .map(T::read_le)
        .collect()
}

// ── Host implementation ──────────────────────────────────────────────

/// Tensor backed by a host `Vec<u8>`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dtype: DataType,
    shape: TensorShape,
    data: Vec<u8>,
}

impl HostTensor {
    /// Zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: TensorShape) -> Self {
        let len = shape.num_elements() * dtype.size_in_bytes();
        Self {
            dtype,
            shape,
            data: vec![0u8; len],
        }
    }

    /// Build a tensor from typed values. `values.len()` must match the shape.
    pub fn from_slice<T: Element>(values: &[T], shape: TensorShape) -> Result<Self> {
        if values.len() != shape.num_elements() {
            return Err(TensorSyncError::BufferSizeMismatch {
                expected: shape.num_elements() * T::DTYPE.size_in_bytes(),
                actual: values.len() * T::DTYPE.size_in_bytes(),
            });
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: encode(values),
        })
    }

    /// One-dimensional tensor holding `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: TensorShape::new([values.len()]),
            data: encode(&values),
        }
    }

    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        decode(&self.data)
    }
}

impl Tensor for HostTensor {
    fn dtype(&self) -> DataType {
        self.dtype
    }

    fn shape(&self) -> &TensorShape {
        &self.shape
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

impl TensorMut for HostTensor {
    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Context that allocates [`HostTensor`] outputs.
///
/// An optional per-allocation byte limit lets callers model an allocator
/// that cannot satisfy large requests.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    max_alloc_bytes: Option<usize>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any single allocation larger than `bytes`.
    pub fn with_allocation_limit(bytes: usize) -> Self {
        Self {
            max_alloc_bytes: Some(bytes),
        }
    }
}

impl OpContext for HostContext {
    fn framework(&self) -> Framework {
        Framework::Native
    }

    fn allocate_output(
        &self,
        name: &str,
        shape: TensorShape,
        dtype: DataType,
    ) -> Result<Box<dyn TensorMut>> {
        let bytes = shape.num_elements() * dtype.size_in_bytes();
        if let Some(limit) = self.max_alloc_bytes
            && bytes > limit
        {
            return Err(TensorSyncError::Allocation {
                name: name.to_string(),
                reason: format!("{bytes} bytes exceeds limit of {limit}"),
            });
        }
        Ok(Box::new(HostTensor::zeros(dtype, shape)))
    }
}
