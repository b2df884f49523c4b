//! Scalar kinds for tensor payloads.

use num_traits::{NumCast, One, Zero};
use std::fmt::{self, Debug};
use std::ops::{Add, Mul};

/// Runtime numeric kind of a payload.
///
/// Kinds are ordered by promotion rank: combining two kinds yields the
/// greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarType {
    /// Every kind, in enumeration order.
    pub const ALL: [ScalarType; 5] = [
        ScalarType::U8,
        ScalarType::I32,
        ScalarType::I64,
        ScalarType::F32,
        ScalarType::F64,
    ];

    /// Whether values of this kind can carry gradients.
    pub fn is_floating_point(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Kind of the result of combining `self` with `other`.
    pub fn promote(self, other: ScalarType) -> ScalarType {
        self.max(other)
    }

    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            ScalarType::U8 => 1,
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::U8 => "Byte",
            ScalarType::I32 => "Int",
            ScalarType::I64 => "Long",
            ScalarType::F32 => "Float",
            ScalarType::F64 => "Double",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for Rust element types that back a [`ScalarType`].
pub trait Element:
    NumCast + Zero + One + Add<Output = Self> + Mul<Output = Self> + Copy + Debug + Send + Sync + 'static
{
    const SCALAR_TYPE: ScalarType;

    /// Lossy conversion from another element type.
    ///
    /// Values that are not representable (NaN into an integer, overflow)
    /// become zero.
    fn cast_from<S: Element>(value: S) -> Self {
        <Self as NumCast>::from(value).unwrap_or_else(Self::zero)
    }
}

impl Element for u8 {
    const SCALAR_TYPE: ScalarType = ScalarType::U8;
}

impl Element for i32 {
    const SCALAR_TYPE: ScalarType = ScalarType::I32;
}

impl Element for i64 {
    const SCALAR_TYPE: ScalarType = ScalarType::I64;
}

impl Element for f32 {
    const SCALAR_TYPE: ScalarType = ScalarType::F32;
}

impl Element for f64 {
    const SCALAR_TYPE: ScalarType = ScalarType::F64;
}
