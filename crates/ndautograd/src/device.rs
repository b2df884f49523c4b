//! Devices, layouts and the legacy (backend, scalar type) enumeration.

use crate::scalar::ScalarType;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Device a payload is bound to.
///
/// Devices are tags: storage for every device lives in host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_cuda(self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Representation class of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Strided,
    Sparse,
}

/// Device type combined with layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Cpu,
    SparseCpu,
    Cuda,
    SparseCuda,
}

impl Backend {
    pub fn new(device: Device, layout: Layout) -> Self {
        match (device, layout) {
            (Device::Cpu, Layout::Strided) => Backend::Cpu,
            (Device::Cpu, Layout::Sparse) => Backend::SparseCpu,
            (Device::Cuda(_), Layout::Strided) => Backend::Cuda,
            (Device::Cuda(_), Layout::Sparse) => Backend::SparseCuda,
        }
    }

    pub fn layout(self) -> Layout {
        match self {
            Backend::Cpu | Backend::Cuda => Layout::Strided,
            Backend::SparseCpu | Backend::SparseCuda => Layout::Sparse,
        }
    }

    pub fn is_cuda(self) -> bool {
        matches!(self, Backend::Cuda | Backend::SparseCuda)
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Cpu => "CPU",
            Backend::SparseCpu => "SparseCPU",
            Backend::Cuda => "CUDA",
            Backend::SparseCuda => "SparseCUDA",
        }
    }
}

/// The legacy "type" of a payload: backend and scalar kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeProperties {
    pub backend: Backend,
    pub scalar_type: ScalarType,
}

impl TypeProperties {
    pub fn new(backend: Backend, scalar_type: ScalarType) -> Self {
        Self {
            backend,
            scalar_type,
        }
    }
}

impl fmt::Display for TypeProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}Type", self.backend.name(), self.scalar_type.name())
    }
}

/// Process-wide runtime state for the device classes.
#[derive(Debug, Default)]
pub struct Context {
    cuda: OnceLock<()>,
    cuda_init_calls: AtomicUsize,
}

impl Context {
    /// Initialize the CUDA runtime state on first use.
    pub fn lazy_init_cuda(&self) {
        self.cuda.get_or_init(|| {
            self.cuda_init_calls.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("initialized CUDA context");
        });
    }

    pub fn is_cuda_initialized(&self) -> bool {
        self.cuda.get().is_some()
    }

    /// Number of times initialization actually ran (at most one).
    pub fn cuda_init_count(&self) -> usize {
        self.cuda_init_calls.load(Ordering::SeqCst)
    }
}

/// The global context.
pub fn global_context() -> &'static Context {
    static CONTEXT: OnceLock<Context> = OnceLock::new();
    CONTEXT.get_or_init(Context::default)
}

fn all_types_for_backends(backends: &[Backend]) -> Vec<TypeProperties> {
    let mut types = Vec::with_capacity(backends.len() * ScalarType::ALL.len());
    for &backend in backends {
        for scalar_type in ScalarType::ALL {
            types.push(TypeProperties::new(backend, scalar_type));
        }
    }
    types
}

/// Every (backend, scalar type) combination for the CPU backends.
pub fn all_cpu_types() -> Vec<TypeProperties> {
    all_types_for_backends(&[Backend::Cpu, Backend::SparseCpu])
}

/// Every (backend, scalar type) combination for the CUDA backends.
///
/// Initializes the CUDA context first.
pub fn all_cuda_types() -> Vec<TypeProperties> {
    global_context().lazy_init_cuda();
    all_types_for_backends(&[Backend::Cuda, Backend::SparseCuda])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_device_and_layout() {
        assert_eq!(Backend::new(Device::Cpu, Layout::Strided), Backend::Cpu);
        assert_eq!(Backend::new(Device::Cuda(1), Layout::Sparse), Backend::SparseCuda);
        assert_eq!(Backend::SparseCpu.layout(), Layout::Sparse);
    }

    #[test]
    fn test_all_cpu_types() {
        let types = all_cpu_types();
        assert_eq!(types.len(), 2 * ScalarType::ALL.len());
        assert!(types.iter().all(|t| !t.backend.is_cuda()));
        assert_eq!(types[0].to_string(), "CPUByteType");
    }

    #[test]
    fn test_all_cuda_types_initializes_context() {
        let types = all_cuda_types();
        assert_eq!(types.len(), 2 * ScalarType::ALL.len());
        assert!(types.iter().all(|t| t.backend.is_cuda()));
        assert!(global_context().is_cuda_initialized());

        all_cuda_types();
        assert_eq!(global_context().cuda_init_count(), 1);
    }

    #[test]
    fn test_local_context_lazy() {
        let ctx = Context::default();
        assert!(!ctx.is_cuda_initialized());
        ctx.lazy_init_cuda();
        ctx.lazy_init_cuda();
        assert!(ctx.is_cuda_initialized());
        assert_eq!(ctx.cuda_init_count(), 1);
    }
}
