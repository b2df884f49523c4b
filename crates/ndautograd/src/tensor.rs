//! Raw (non-differentiable) tensor payload.
//!
//! A [`RawTensor`] is a window over a shared [`Storage`]: shape, strides and
//! storage offset, plus the scalar kind, device and layout of the elements.
//! Cloning a `RawTensor` is shallow; both clones alias the same storage.

use crate::device::{Backend, Device, Layout, TypeProperties};
use crate::error::TensorError;
use crate::scalar::{Element, ScalarType};
use crate::storage::{Buffer, Storage};
use crate::strides::{DimVec, compute_strides, is_contiguous, numel, storage_index};

/// The numeric payload wrapped by a differentiable handle.
#[derive(Debug, Clone)]
pub struct RawTensor {
    storage: Storage,
    shape: DimVec,
    strides: DimVec,
    offset: usize,
    scalar_type: ScalarType,
    device: Device,
    layout: Layout,
    names: Option<Vec<Option<String>>>,
    allow_metadata_change: bool,
}

impl RawTensor {
    fn with_storage(storage: Storage, shape: &[usize], layout: Layout) -> Self {
        let scalar_type = storage.scalar_type();
        Self {
            storage,
            shape: shape.iter().copied().collect(),
            strides: compute_strides(shape),
            offset: 0,
            scalar_type,
            device: Device::Cpu,
            layout,
            names: None,
            allow_metadata_change: true,
        }
    }

    /// Create a payload from column-major data.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if data length doesn't match shape.
    ///
    /// # Example
    ///
    /// ```
    /// use ndautograd::RawTensor;
    ///
    /// let t = RawTensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    /// assert_eq!(t.shape(), &[2, 2]);
    /// assert_eq!(t.to_vec::<f64>(), vec![1.0, 2.0, 3.0, 4.0]);
    /// ```
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self, TensorError> {
        let expected = numel(shape);
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let buffer = Buffer::from_elements(T::SCALAR_TYPE, &data);
        Ok(Self::with_storage(Storage::new(buffer), shape, Layout::Strided))
    }

    /// 0-dimensional payload holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let buffer = Buffer::from_elements(T::SCALAR_TYPE, &[value]);
        Self::with_storage(Storage::new(buffer), &[], Layout::Strided)
    }

    pub fn zeros(shape: &[usize], scalar_type: ScalarType) -> Self {
        Self::with_storage(
            Storage::zeros(scalar_type, numel(shape)),
            shape,
            Layout::Strided,
        )
    }

    pub fn ones(shape: &[usize], scalar_type: ScalarType) -> Self {
        Self::full(shape, 1.0, scalar_type)
    }

    pub fn full(shape: &[usize], value: f64, scalar_type: ScalarType) -> Self {
        let buffer = Buffer::from_elements(scalar_type, &vec![value; numel(shape)]);
        Self::with_storage(Storage::new(buffer), shape, Layout::Strided)
    }

    /// Zero payload with sparse layout.
    ///
    /// Sparse payloads only participate in type bookkeeping; kernels reject
    /// them.
    pub fn sparse(shape: &[usize], scalar_type: ScalarType) -> Self {
        Self::with_storage(Storage::zeros(scalar_type, 0), shape, Layout::Sparse)
    }

    /// Tag this payload with a device.
    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Contiguous copy of this payload on another device.
    pub fn to(&self, device: Device) -> Self {
        self.deep_clone().on_device(device)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[inline]
    pub fn storage_offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn backend(&self) -> Backend {
        Backend::new(self.device, self.layout)
    }

    pub fn type_properties(&self) -> TypeProperties {
        TypeProperties::new(self.backend(), self.scalar_type)
    }

    pub fn is_contiguous(&self) -> bool {
        is_contiguous(&self.shape, &self.strides)
    }

    pub fn names(&self) -> Option<&[Option<String>]> {
        self.names.as_deref()
    }

    /// Attach per-dimension names.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the number of names differs
    /// from the number of dimensions.
    pub fn set_names(&mut self, names: Vec<Option<String>>) -> Result<(), TensorError> {
        if names.len() != self.ndim() {
            return Err(TensorError::ShapeMismatch {
                expected: self.ndim(),
                actual: names.len(),
            });
        }
        self.names = Some(names);
        Ok(())
    }

    pub(crate) fn propagate_names_from(&mut self, other: &RawTensor) {
        if other.ndim() == self.ndim() {
            self.names = other.names.clone();
        }
    }

    pub fn allow_metadata_change(&self) -> bool {
        self.allow_metadata_change
    }

    pub fn set_allow_metadata_change(&mut self, allow: bool) {
        self.allow_metadata_change = allow;
    }

    /// Whether both payloads alias the same storage.
    pub fn shares_storage_with(&self, other: &RawTensor) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// Storage positions of the elements, in column-major logical order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.numel()).map(move |i| storage_index(i, &self.shape, &self.strides, self.offset))
    }

    /// Elements in column-major logical order, cast to `T`.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        if self.layout == Layout::Sparse {
            return vec![T::zero(); self.numel()];
        }
        self.storage.read().gather(self.positions())
    }

    /// The single element of a one-element payload.
    pub fn item<T: Element>(&self) -> Option<T> {
        if self.numel() != 1 {
            return None;
        }
        self.to_vec::<T>().into_iter().next()
    }

    /// Contiguous copy with fresh, unshared storage.
    pub fn deep_clone(&self) -> Self {
        if self.layout == Layout::Sparse {
            let mut out = Self::sparse(&self.shape, self.scalar_type).on_device(self.device);
            out.names = self.names.clone();
            return out;
        }
        let buffer = match self.scalar_type {
            ScalarType::U8 => Buffer::from_elements(self.scalar_type, &self.to_vec::<u8>()),
            ScalarType::I32 => Buffer::from_elements(self.scalar_type, &self.to_vec::<i32>()),
            ScalarType::I64 => Buffer::from_elements(self.scalar_type, &self.to_vec::<i64>()),
            ScalarType::F32 => Buffer::from_elements(self.scalar_type, &self.to_vec::<f32>()),
            ScalarType::F64 => Buffer::from_elements(self.scalar_type, &self.to_vec::<f64>()),
        };
        let mut out = Self::with_storage(Storage::new(buffer), &self.shape, self.layout);
        out.device = self.device;
        out.names = self.names.clone();
        out
    }

    /// A payload aliasing this one's storage with a new shape, strides and
    /// offset.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidView` if the window falls outside the
    /// storage or the payload is not strided.
    pub fn as_strided(
        &self,
        shape: &[usize],
        strides: &[usize],
        offset: usize,
    ) -> Result<Self, TensorError> {
        if self.layout != Layout::Strided {
            return Err(TensorError::UnsupportedLayout {
                op: "as_strided",
                layout: self.layout,
            });
        }
        if shape.len() != strides.len() {
            return Err(TensorError::InvalidView {
                message: format!("{} dimensions but {} strides", shape.len(), strides.len()),
            });
        }
        if numel(shape) > 0 {
            let last = offset
                + shape
                    .iter()
                    .zip(strides)
                    .map(|(&d, &s)| (d - 1) * s)
                    .sum::<usize>();
            if last >= self.storage.len() {
                return Err(TensorError::InvalidView {
                    message: format!(
                        "view reaches storage position {last} but storage has {} elements",
                        self.storage.len()
                    ),
                });
            }
        }
        let mut out = self.clone();
        out.shape = shape.iter().copied().collect();
        out.strides = strides.iter().copied().collect();
        out.offset = offset;
        out.names = None;
        out.allow_metadata_change = true;
        Ok(out)
    }

    /// Restride to a contiguous layout of `shape`, growing storage if it is
    /// too small.
    pub(crate) fn set_sizes_contiguous(&mut self, shape: &[usize]) -> Result<(), TensorError> {
        if !self.allow_metadata_change {
            return Err(TensorError::MetadataChangeNotAllowed { op: "resize_" });
        }
        let needed = self.offset + numel(shape);
        if self.storage.len() < needed {
            self.storage.write().grow(needed);
        }
        if self.names.is_some() && shape.len() != self.shape.len() {
            self.names = None;
        }
        self.shape = shape.iter().copied().collect();
        self.strides = compute_strides(shape);
        Ok(())
    }

    /// Copy every field of `other` into `self`, except the metadata-change
    /// flag.
    pub fn shallow_copy_from(&mut self, other: &RawTensor) {
        let allow = self.allow_metadata_change;
        *self = other.clone();
        self.allow_metadata_change = allow;
    }
}
