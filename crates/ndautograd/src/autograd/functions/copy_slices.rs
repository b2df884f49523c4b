//! Backward functions for in-place writes through a view.
//!
//! Writing into a view changes the payload of its base, so the base needs a
//! new producer that routes the gradient of the written window through the
//! write's backward function and the rest to the base's prior history. The
//! view itself is then re-derived from the base's new producer.

use super::InputInfo;
use crate::autograd::graph::GradFn;
use crate::error::Result;
use crate::operations;
use crate::strides::DimVec;
use crate::tensor::RawTensor;

/// Shape, strides and storage offset of a strided payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StridedGeometry {
    pub shape: DimVec,
    pub strides: DimVec,
    pub offset: usize,
}

impl StridedGeometry {
    pub fn of(t: &RawTensor) -> Self {
        Self {
            shape: t.shape().iter().copied().collect(),
            strides: t.strides().iter().copied().collect(),
            offset: t.storage_offset(),
        }
    }

    /// Number of storage elements needed to hold every position.
    fn extent(&self) -> usize {
        if self.shape.contains(&0) {
            return self.offset;
        }
        self.offset
            + self
                .shape
                .iter()
                .zip(&self.strides)
                .map(|(&d, &s)| (d - 1) * s)
                .sum::<usize>()
            + 1
    }

    fn over(&self, buffer: &RawTensor) -> Result<RawTensor> {
        Ok(buffer.as_strided(&self.shape, &self.strides, self.offset)?)
    }
}

/// Zero buffer laid out like `base`, and the `base` and `view` windows
/// into it.
fn base_buffer(
    base: &StridedGeometry,
    view: &StridedGeometry,
    like: &RawTensor,
) -> Result<(RawTensor, RawTensor)> {
    let extent = base.extent().max(view.extent());
    let buffer = RawTensor::zeros(&[extent], like.scalar_type());
    Ok((base.over(&buffer)?, view.over(&buffer)?))
}

/// Producer of a base whose window was overwritten in place.
///
/// Wraps the backward function of the write; its next edges are those of
/// the write, with the first one replaced by the base's prior history.
#[derive(Debug)]
pub struct CopySlices {
    base: InputInfo,
    base_geometry: StridedGeometry,
    view_geometry: StridedGeometry,
    function: Box<dyn GradFn>,
}

impl CopySlices {
    pub fn new(
        base: &RawTensor,
        view_geometry: StridedGeometry,
        function: Box<dyn GradFn>,
    ) -> Self {
        Self {
            base: InputInfo::of(base),
            base_geometry: StridedGeometry::of(base),
            view_geometry,
            function,
        }
    }
}

impl GradFn for CopySlices {
    fn name(&self) -> &'static str {
        "CopySlices"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = grads.into_iter().next().flatten() else {
            return Ok(vec![None, None]);
        };
        let (result, window) = base_buffer(&self.base_geometry, &self.view_geometry, &grad)?;
        operations::copy_(&result, &grad)?;

        let mut outputs = self.function.apply(vec![Some(window.deep_clone())])?;
        match outputs.first_mut().and_then(Option::take) {
            Some(window_grad) => operations::copy_(&window, &window_grad)?,
            None => operations::fill_(&window, 0.0)?,
        }
        let result = self.base.conform(result.deep_clone())?;
        match outputs.first_mut() {
            Some(first) => *first = Some(result),
            None => outputs.push(Some(result)),
        }
        Ok(outputs)
    }

    fn release_variables(&self) {
        self.function.release_variables();
    }
}

/// Producer of a view re-derived from its base after an in-place write.
///
/// Scatters the view's gradient into a zero gradient of the base.
#[derive(Debug)]
pub struct AsStridedBackward {
    base: InputInfo,
    base_geometry: StridedGeometry,
    view_geometry: StridedGeometry,
}

impl AsStridedBackward {
    pub fn new(base: &RawTensor, view_geometry: StridedGeometry) -> Self {
        Self {
            base: InputInfo::of(base),
            base_geometry: StridedGeometry::of(base),
            view_geometry,
        }
    }
}

impl GradFn for AsStridedBackward {
    fn name(&self) -> &'static str {
        "AsStridedBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = grads.into_iter().next().flatten() else {
            return Ok(vec![None]);
        };
        let (result, window) = base_buffer(&self.base_geometry, &self.view_geometry, &grad)?;
        operations::copy_(&window, &grad)?;
        Ok(vec![Some(self.base.conform(result.deep_clone())?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::functions::CopyBackwards;
    use crate::scalar::ScalarType;

    fn base_and_window() -> (RawTensor, StridedGeometry) {
        let base = RawTensor::zeros(&[2, 3], ScalarType::F64);
        // column 1 of the 2x3 base
        let window = base.as_strided(&[2], &[1], 2).unwrap();
        (base, StridedGeometry::of(&window))
    }

    #[test]
    fn test_copy_slices_splits_gradient() {
        let (base, window) = base_and_window();
        let src = RawTensor::zeros(&[2], ScalarType::F64);
        let node = CopySlices::new(
            &base,
            window,
            Box::new(CopyBackwards::new(InputInfo::of(&src))),
        );

        let grad = RawTensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let out = node.apply(vec![Some(grad)]).unwrap();
        assert_eq!(out.len(), 2);
        let base_grad = out[0].as_ref().unwrap();
        assert_eq!(base_grad.shape(), &[2, 3]);
        assert_eq!(
            base_grad.to_vec::<f64>(),
            vec![1.0, 2.0, 0.0, 0.0, 5.0, 6.0]
        );
        assert_eq!(out[1].as_ref().unwrap().to_vec::<f64>(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_as_strided_backward_scatters_into_base() {
        let (base, window) = base_and_window();
        let node = AsStridedBackward::new(&base, window);
        let grad = RawTensor::from_vec(vec![7.0f64, 8.0], &[2]).unwrap();
        let out = node.apply(vec![Some(grad)]).unwrap();
        assert_eq!(
            out[0].as_ref().unwrap().to_vec::<f64>(),
            vec![0.0, 0.0, 7.0, 8.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_offset_base() {
        let storage = RawTensor::zeros(&[6], ScalarType::F64);
        let base = storage.as_strided(&[4], &[1], 2).unwrap();
        let window = base.as_strided(&[2], &[1], 3).unwrap();
        let node = AsStridedBackward::new(&base, StridedGeometry::of(&window));
        let grad = RawTensor::from_vec(vec![1.0f64, 1.0], &[2]).unwrap();
        let out = node.apply(vec![Some(grad)]).unwrap();
        assert_eq!(
            out[0].as_ref().unwrap().to_vec::<f64>(),
            vec![0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_missing_gradient() {
        let (base, window) = base_and_window();
        let node = AsStridedBackward::new(&base, window);
        assert!(node.apply(vec![None]).unwrap()[0].is_none());
    }
}
