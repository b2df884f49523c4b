//! Gradient sink for leaf handles.

use crate::autograd::graph::GradFn;
use crate::autograd::variable::Variable;
use crate::error::Result;
use crate::tensor::RawTensor;

/// Sums every gradient it receives into its leaf's `grad`.
///
/// Holds the leaf strongly; the leaf only refers back to it weakly, so the
/// accumulator lives exactly as long as some downstream node points at it.
#[derive(Debug)]
pub struct AccumulateGrad {
    variable: Variable,
}

impl AccumulateGrad {
    pub fn new(variable: Variable) -> Self {
        Self { variable }
    }

    pub fn variable(&self) -> &Variable {
        &self.variable
    }
}

impl GradFn for AccumulateGrad {
    fn name(&self) -> &'static str {
        "AccumulateGrad"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        if let Some(grad) = grads.into_iter().next().flatten() {
            self.variable.accumulate_grad(grad)?;
        }
        Ok(Vec::new())
    }
}
