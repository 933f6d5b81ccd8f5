pub mod context;
pub mod cpu;
pub mod gpu;
pub mod gpu_kernels;

pub use context::{BackendKind, ComputeContext, RefractiveMapSpec};
pub use cpu::CpuBackend;
pub use gpu::{GpuContext, GpuFrame};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("kernel error: {0}")]
    KernelError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<Error> for sapiv_core::Error {
    fn from(e: Error) -> Self {
        sapiv_core::Error::Runtime(e.to_string())
    }
}
