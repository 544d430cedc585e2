use render_api::{BackendError, ShadingProgram};

use crate::config::ConfigError;
use crate::pool::PoolError;

/// Failure while running a frame.
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("frame graph has a cycle")]
    GraphCycle,
}

/// Failure that leaves the lighting component inert for its viewer.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("shading program `{}` is required but unavailable", .0.label())]
    MissingProgram(ShadingProgram),

    #[error("viewer cannot drive lighting: {0}")]
    InvalidViewer(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
