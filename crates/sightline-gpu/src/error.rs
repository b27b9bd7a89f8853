//! GPU error types.

use sightline_core::{BackendError, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no GPU adapter available: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("unknown GPU resource {0}")]
    UnknownResource(ResourceId),

    #[error("resource {0} is not a {1}")]
    WrongResource(ResourceId, &'static str),

    #[error("unsupported on this device: {0}")]
    Unsupported(String),
}

impl From<GpuError> for BackendError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::UnknownResource(id) => BackendError::UnknownResource(id),
            GpuError::Unsupported(what) => BackendError::Unsupported(what),
            other => BackendError::Allocation(other.to_string()),
        }
    }
}
