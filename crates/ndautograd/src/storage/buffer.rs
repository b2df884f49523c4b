//! Type-erased element buffers.

use crate::scalar::{Element, ScalarType};

/// Host buffer holding the elements of one [`ScalarType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the typed vector inside a buffer.
macro_rules! with_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            Buffer::U8($v) => $body,
            Buffer::I32($v) => $body,
            Buffer::I64($v) => $body,
            Buffer::F32($v) => $body,
            Buffer::F64($v) => $body,
        }
    };
}

/// Typed access to the vector inside a [`Buffer`].
pub trait BufferElement: Element {
    fn wrap(data: Vec<Self>) -> Buffer;
    fn slice(buffer: &Buffer) -> Option<&[Self]>;
    fn slice_mut(buffer: &mut Buffer) -> Option<&mut Vec<Self>>;
}

macro_rules! impl_buffer_element {
    ($ty:ty, $variant:ident) => {
        impl BufferElement for $ty {
            fn wrap(data: Vec<Self>) -> Buffer {
                Buffer::$variant(data)
            }

            fn slice(buffer: &Buffer) -> Option<&[Self]> {
                match buffer {
                    Buffer::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut Buffer) -> Option<&mut Vec<Self>> {
                match buffer {
                    Buffer::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_buffer_element!(u8, U8);
impl_buffer_element!(i32, I32);
impl_buffer_element!(i64, I64);
impl_buffer_element!(f32, F32);
impl_buffer_element!(f64, F64);

impl Buffer {
    /// Create a zero-initialized buffer.
    pub fn zeros(scalar_type: ScalarType, len: usize) -> Self {
        Self::from_elements::<u8>(scalar_type, &vec![0u8; len])
    }

    /// Create a buffer of `scalar_type` from elements of any kind.
    pub fn from_elements<S: Element>(scalar_type: ScalarType, values: &[S]) -> Self {
        fn cast<S: Element, D: BufferElement>(values: &[S]) -> Buffer {
            D::wrap(values.iter().map(|&v| D::cast_from(v)).collect())
        }
        match scalar_type {
            ScalarType::U8 => cast::<S, u8>(values),
            ScalarType::I32 => cast::<S, i32>(values),
            ScalarType::I64 => cast::<S, i64>(values),
            ScalarType::F32 => cast::<S, f32>(values),
            ScalarType::F64 => cast::<S, f64>(values),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Buffer::U8(_) => ScalarType::U8,
            Buffer::I32(_) => ScalarType::I32,
            Buffer::I64(_) => ScalarType::I64,
            Buffer::F32(_) => ScalarType::F32,
            Buffer::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow (zero-filled) to at least `len` elements.
    pub fn grow(&mut self, len: usize) {
        with_buffer!(self, v => {
            if v.len() < len {
                v.resize(len, num_traits::Zero::zero());
            }
        })
    }

    /// Read the elements at `positions`, cast to `T`.
    pub fn gather<T: Element>(&self, positions: impl Iterator<Item = usize>) -> Vec<T> {
        with_buffer!(self, v => positions.map(|p| T::cast_from(v[p])).collect())
    }

    /// Write `values` (cast to this buffer's kind) at `positions`.
    pub fn scatter<T: Element>(&mut self, positions: impl Iterator<Item = usize>, values: &[T]) {
        with_buffer!(self, v => {
            for (p, &x) in positions.zip(values) {
                v[p] = Element::cast_from(x);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let buf = Buffer::zeros(ScalarType::F32, 4);
        assert_eq!(buf, Buffer::F32(vec![0.0; 4]));
        assert_eq!(buf.scalar_type(), ScalarType::F32);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_from_elements_casts() {
        let buf = Buffer::from_elements(ScalarType::I64, &[1.5f64, -2.5]);
        assert_eq!(buf, Buffer::I64(vec![1, -2]));
    }

    #[test]
    fn test_gather_scatter() {
        let mut buf = Buffer::F64(vec![1.0, 2.0, 3.0, 4.0]);
        let picked: Vec<i32> = buf.gather([3, 0].into_iter());
        assert_eq!(picked, vec![4, 1]);

        buf.scatter([1, 2].into_iter(), &[7i32, 8]);
        assert_eq!(buf, Buffer::F64(vec![1.0, 7.0, 8.0, 4.0]));
    }

    #[test]
    fn test_grow() {
        let mut buf = Buffer::U8(vec![1, 2]);
        buf.grow(4);
        assert_eq!(buf, Buffer::U8(vec![1, 2, 0, 0]));
        buf.grow(1);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_typed_slice() {
        let buf = Buffer::F64(vec![1.0]);
        assert_eq!(f64::slice(&buf), Some(&[1.0][..]));
        assert!(f32::slice(&buf).is_none());
    }
}
