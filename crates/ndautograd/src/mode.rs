//! Thread-local differentiation modes.
//!
//! Both modes are scoped with RAII guards that restore the previous state
//! on drop, so guards nest.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
    static NON_VARIABLE_TYPE: Cell<bool> = const { Cell::new(false) };
}

/// Whether differentiable operations record graph nodes on this thread.
pub struct GradMode;

impl GradMode {
    pub fn is_enabled() -> bool {
        GRAD_ENABLED.with(|g| g.get())
    }

    pub fn set_enabled(enabled: bool) {
        GRAD_ENABLED.with(|g| g.set(enabled));
    }
}

/// Sets grad mode for the lifetime of the guard.
#[must_use = "the mode is restored when the guard is dropped"]
pub struct GradModeGuard {
    prev: bool,
}

impl GradModeGuard {
    pub fn new(enabled: bool) -> Self {
        let prev = GradMode::is_enabled();
        GradMode::set_enabled(enabled);
        Self { prev }
    }
}

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        GradMode::set_enabled(self.prev);
    }
}

/// Disables grad mode for the lifetime of the guard.
///
/// # Example
///
/// ```
/// use ndautograd::mode::{GradMode, NoGradGuard};
///
/// {
///     let _guard = NoGradGuard::new();
///     assert!(!GradMode::is_enabled());
/// }
/// assert!(GradMode::is_enabled());
/// ```
#[must_use = "the mode is restored when the guard is dropped"]
pub struct NoGradGuard {
    _inner: GradModeGuard,
}

impl NoGradGuard {
    pub fn new() -> Self {
        Self {
            _inner: GradModeGuard::new(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a numeric-kernel call made on behalf of a differentiable handle.
///
/// Inside this scope, differentiable operations behave as plain numeric
/// ones: they neither record producers nor check in-place eligibility.
#[must_use = "the mode is restored when the guard is dropped"]
pub struct NonVariableTypeGuard {
    prev: bool,
}

impl NonVariableTypeGuard {
    pub fn new() -> Self {
        let prev = NON_VARIABLE_TYPE.with(|m| m.replace(true));
        Self { prev }
    }

    pub fn is_enabled() -> bool {
        NON_VARIABLE_TYPE.with(|m| m.get())
    }
}

impl Default for NonVariableTypeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NonVariableTypeGuard {
    fn drop(&mut self) {
        NON_VARIABLE_TYPE.with(|m| m.set(self.prev));
    }
}

/// Whether graph recording is active on this thread.
pub(crate) fn is_recording() -> bool {
    GradMode::is_enabled() && !NonVariableTypeGuard::is_enabled()
}
