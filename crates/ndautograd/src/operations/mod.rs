//! Numeric kernels over raw payloads.
//!
//! These kernels know nothing about differentiation: they read and write
//! [`RawTensor`] payloads only. The autograd layer calls them inside a
//! [`NonVariableTypeGuard`](crate::mode::NonVariableTypeGuard) scope.
//!
//! ```text
//! autograd::copy_  ──► operations::copy_      (broadcast + cast + strided write)
//! autograd::resize_ ─► operations::resize_    (contiguous restride)
//! backward fns     ──► operations::{add, mul, sum_to, ...}
//! ```

/// Run `$body` with `$T` bound to the Rust element type of a scalar kind.
macro_rules! dispatch_scalar {
    ($st:expr, $T:ident => $body:expr) => {
        match $st {
            $crate::scalar::ScalarType::U8 => {
                type $T = u8;
                $body
            }
            $crate::scalar::ScalarType::I32 => {
                type $T = i32;
                $body
            }
            $crate::scalar::ScalarType::I64 => {
                type $T = i64;
                $body
            }
            $crate::scalar::ScalarType::F32 => {
                type $T = f32;
                $body
            }
            $crate::scalar::ScalarType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

mod copy;
mod elementwise;
mod reduce;
mod resize;

pub use copy::copy_;
pub use elementwise::{add, cast, fill_, mul, ones_like, zeros_like};
pub use reduce::{sum, sum_to};
pub use resize::{resize_, resize_as_};

use crate::device::Layout;
use crate::error::TensorError;
use crate::strides::{DimVec, broadcast_strides, numel, storage_index};
use crate::tensor::RawTensor;

fn ensure_strided(t: &RawTensor, op: &'static str) -> Result<(), TensorError> {
    if t.layout() != Layout::Strided {
        return Err(TensorError::UnsupportedLayout {
            op,
            layout: t.layout(),
        });
    }
    Ok(())
}

/// Shape two operands broadcast to.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<DimVec, TensorError> {
    let ndim = a.len().max(b.len());
    let mut shape = DimVec::with_capacity(ndim);
    for i in 0..ndim {
        let da = if i + a.len() >= ndim { a[i + a.len() - ndim] } else { 1 };
        let db = if i + b.len() >= ndim { b[i + b.len() - ndim] } else { 1 };
        let dim = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(TensorError::BroadcastMismatch {
                    src: b.to_vec(),
                    dst: a.to_vec(),
                });
            }
        };
        shape.push(dim);
    }
    Ok(shape)
}

/// Storage positions of `t`'s elements when read as a tensor of `shape`.
fn broadcast_positions(t: &RawTensor, shape: &[usize]) -> Result<Vec<usize>, TensorError> {
    let strides = broadcast_strides(t.shape(), t.strides(), shape)?;
    let offset = t.storage_offset();
    Ok((0..numel(shape))
        .map(|i| storage_index(i, shape, &strides, offset))
        .collect())
}
