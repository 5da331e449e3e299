//! Element-wise sum over byte buffers, used by in-process backends.

use crate::error::{Result, TensorSyncError};
use crate::tensor::Element;
use crate::types::DataType;

/// Element types that can be summed.
pub(crate) trait Summable: Element {
    fn sum(a: Self, b: Self) -> Self;
}

macro_rules! impl_summable {
    (int: $($ty:ty),*) => {
        $(
            impl Summable for $ty {
                #[inline]
                fn sum(a: Self, b: Self) -> Self {
                    a.wrapping_add(b)
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Summable for $ty {
                #[inline]
                fn sum(a: Self, b: Self) -> Self {
                    a + b
                }
            }
        )*
    };
}

impl_summable!(int: i8, i32, i64, u8, u32, u64);
impl_summable!(float: f32, f64);

/// `dst[i] += src[i]` for every element, interpreting both as `dtype`.
///
/// `dst` and `src` must have the same length, a multiple of the element size.
pub(crate) fn sum_into(dst: &mut [u8], src: &[u8], dtype: DataType) -> Result<()> {
    if dst.len() != src.len() {
        return Err(TensorSyncError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    match dtype {
        DataType::F32 => sum_typed::<f32>(dst, src),
        DataType::F64 => sum_typed::<f64>(dst, src),
        DataType::I32 => sum_typed::<i32>(dst, src),
        DataType::I64 => sum_typed::<i64>(dst, src),
        DataType::U32 => sum_typed::<u32>(dst, src),
        DataType::U64 => sum_typed::<u64>(dst, src),
        DataType::I8 => sum_typed::<i8>(dst, src),
        DataType::U8 => sum_typed::<u8>(dst, src),
        DataType::F16 | DataType::BF16 => {
            return Err(TensorSyncError::UnsupportedDType {
                dtype,
                op: "allreduce",
            });
        }
    }
    Ok(())
}

fn sum_typed<T: Summable>(dst: &mut [u8], src: &[u8]) {
    let t_size = std::mem::size_of::<T>();
    for (d, s) in dst.chunks_exact_mut(t_size).zip(src.chunks_exact(t_size)) {
        T::sum(T::read_le(d), T::read_le(s)).write_le(d);
    }
}
