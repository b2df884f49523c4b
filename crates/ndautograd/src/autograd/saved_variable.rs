//! Handles saved by backward functions during the forward pass.

use super::variable::{Variable, VersionCounter};
use crate::error::{AutogradError, Result};
use crate::tensor::RawTensor;
use parking_lot::Mutex;

/// Snapshot of a handle needed by a backward function.
///
/// Holds an alias of the payload and the version of the shared counter at
/// save time, so in-place mutation between forward and backward is
/// detected on unpack.
#[derive(Debug)]
pub struct SavedVariable {
    data: Mutex<Option<RawTensor>>,
    version_counter: VersionCounter,
    saved_version: u32,
}

impl SavedVariable {
    pub fn new(var: &Variable) -> Self {
        Self {
            data: Mutex::new(Some(var.tensor())),
            version_counter: var.version_counter().clone(),
            saved_version: var.version(),
        }
    }

    /// Version of the counter when this snapshot was taken.
    pub fn saved_version(&self) -> u32 {
        self.saved_version
    }

    /// The saved payload.
    ///
    /// # Errors
    ///
    /// Returns `AutogradError::InvalidOperation` after the payload was
    /// released, and `AutogradError::InvalidMutation` if the payload was
    /// modified in place since it was saved.
    pub fn unpack(&self) -> Result<RawTensor> {
        let data = self.data.lock().clone().ok_or_else(|| {
            AutogradError::InvalidOperation(
                "trying to backward through the graph a second time, but the saved intermediate results have already been freed; specify keep_graph=true on the first call".into(),
            )
        })?;
        let current = self.version_counter.current();
        if current != self.saved_version {
            return Err(AutogradError::InvalidMutation(format!(
                "one of the variables needed for gradient computation has been modified by an inplace operation: is at version {current}; expected version {} instead",
                self.saved_version
            )));
        }
        Ok(data)
    }

    /// Drop the saved payload.
    pub fn reset_data(&self) {
        let old = self.data.lock().take();
        drop(old);
    }

    pub fn is_released(&self) -> bool {
        self.data.lock().is_none()
    }
}
