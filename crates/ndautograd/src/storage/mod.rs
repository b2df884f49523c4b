//! Shared storage for tensor payloads.
//!
//! ```text
//! RawTensor ──┐
//! RawTensor ──┼──► Storage (Arc<RwLock<Buffer>>)
//! RawTensor ──┘
//! ```
//!
//! Every payload aliasing the same storage observes writes made through
//! any of them.

mod buffer;

use crate::scalar::ScalarType;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

pub use buffer::{Buffer, BufferElement};

/// Reference-counted element storage.
#[derive(Debug, Clone)]
pub struct Storage {
    buffer: Arc<RwLock<Buffer>>,
}

impl Storage {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(buffer)),
        }
    }

    pub fn zeros(scalar_type: ScalarType, len: usize) -> Self {
        Self::new(Buffer::zeros(scalar_type, len))
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.buffer.read().scalar_type()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Buffer> {
        self.buffer.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Buffer> {
        self.buffer.write()
    }

    /// Whether both handles alias the same buffer.
    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Number of payloads currently aliasing this storage.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    /// Copy the elements into fresh, unshared storage.
    pub fn deep_clone(&self) -> Self {
        Self::new(self.buffer.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_aliases() {
        let a = Storage::new(Buffer::F64(vec![1.0, 2.0]));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.use_count(), 2);

        if let Buffer::F64(v) = &mut *b.write() {
            v[0] = 10.0;
        }
        assert_eq!(*a.read(), Buffer::F64(vec![10.0, 2.0]));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let a = Storage::zeros(ScalarType::I32, 3);
        let b = a.deep_clone();
        assert!(!a.ptr_eq(&b));
        b.write().grow(5);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 5);
    }
}
