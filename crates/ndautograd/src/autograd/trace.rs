//! Hooks for an external graph-capture observer.
//!
//! Operations call the hooks unconditionally. With no observer installed on
//! the current thread the calls reach a no-op observer.

use super::variable::Variable;
use std::cell::RefCell;
use std::rc::Rc;

/// Receives notifications from the mutating and graph-severing operations.
///
/// Every method defaults to doing nothing.
pub trait TraceObserver {
    fn begin_op(&self, _name: &str, _inputs: &[&Variable]) {}

    fn end_op(&self, _name: &str, _outputs: &[&Variable]) {}

    /// An operation that cannot be captured faithfully.
    fn warn(&self, _name: &str, _message: &str) {}
}

#[derive(Debug, Default)]
struct NoopObserver;

impl TraceObserver for NoopObserver {}

thread_local! {
    static OBSERVER: RefCell<Option<Rc<dyn TraceObserver>>> = const { RefCell::new(None) };
    static NOOP: Rc<dyn TraceObserver> = Rc::new(NoopObserver);
}

/// Install `observer` on this thread, returning the previous one.
pub fn set_trace_observer(observer: Rc<dyn TraceObserver>) -> Option<Rc<dyn TraceObserver>> {
    OBSERVER.with(|slot| slot.borrow_mut().replace(observer))
}

/// Remove this thread's observer, returning it.
pub fn clear_trace_observer() -> Option<Rc<dyn TraceObserver>> {
    OBSERVER.with(|slot| slot.borrow_mut().take())
}

/// Whether an observer is installed on this thread.
pub fn is_tracing() -> bool {
    OBSERVER.with(|slot| slot.borrow().is_some())
}

// The slot is not borrowed while the observer runs, so observers may
// themselves install or clear observers.
fn current() -> Rc<dyn TraceObserver> {
    OBSERVER
        .with(|slot| slot.borrow().clone())
        .unwrap_or_else(|| NOOP.with(Rc::clone))
}

pub(crate) fn begin_op(name: &str, inputs: &[&Variable]) {
    current().begin_op(name, inputs);
}

pub(crate) fn end_op(name: &str, outputs: &[&Variable]) {
    current().end_op(name, outputs);
}

pub(crate) fn warn(name: &str, message: &str) {
    current().warn(name, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::ScalarType;
    use crate::tensor::RawTensor;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
    }

    impl TraceObserver for Recorder {
        fn begin_op(&self, name: &str, inputs: &[&Variable]) {
            self.events
                .borrow_mut()
                .push(format!("begin {name} {}", inputs.len()));
        }

        fn end_op(&self, name: &str, outputs: &[&Variable]) {
            self.events
                .borrow_mut()
                .push(format!("end {name} {}", outputs.len()));
        }
    }

    #[test]
    fn test_install_and_clear() {
        assert!(!is_tracing());
        let recorder = Rc::new(Recorder::default());
        assert!(set_trace_observer(recorder.clone()).is_none());
        assert!(is_tracing());

        let v = Variable::new(RawTensor::zeros(&[1], ScalarType::F64), false).unwrap();
        begin_op("op", &[&v, &v]);
        end_op("op", &[&v]);
        warn("op", "ignored by default");

        assert!(clear_trace_observer().is_some());
        assert!(!is_tracing());
        begin_op("after", &[]);
        assert_eq!(*recorder.events.borrow(), vec!["begin op 2", "end op 1"]);
    }

    #[test]
    fn test_set_returns_previous() {
        let first: Rc<dyn TraceObserver> = Rc::new(Recorder::default());
        set_trace_observer(first.clone());
        let previous = set_trace_observer(Rc::new(Recorder::default())).unwrap();
        assert!(Rc::ptr_eq(&previous, &first));
        clear_trace_observer();
    }
}
