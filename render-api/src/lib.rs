//! Shared render API for Penumbra.
//! Defines the collaborator contract between the lighting compositor and the
//! renderer that owns the scene: view math, render targets, visibility tags,
//! shading program ids, the per-viewer parameter block and extracted scene data.

mod backend;
mod emitter;
mod error;
mod extract;
mod mask;
mod params;
mod program;
mod targets;
pub mod view;

pub use backend::LightingBackend;
pub use emitter::{EmitterId, EmitterShape, LightEmitter};
pub use error::BackendError;
pub use extract::{ExtractedObject, ExtractedScene, VERTEX_STRIDE};
pub use mask::VisibilityMask;
pub use params::{ParamName, ParamValue, ParameterBlock};
pub use program::{BlendMode, ShadingProgram};
pub use targets::{ClearMode, FilterMode, PixelFormat, TargetDesc, TargetId};
pub use view::{Projection, Rect, ViewSetup};
