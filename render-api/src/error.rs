use crate::program::ShadingProgram;
use crate::targets::TargetId;

/// Failure reported by a [`crate::LightingBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),

    #[error("shading program `{}` is not available", .0.label())]
    MissingProgram(ShadingProgram),

    #[error("invalid target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("source and destination must differ ({0:?})")]
    Aliased(TargetId),

    #[error("{0}")]
    Device(String),
}
