//! The collaborator contract: what the lighting compositor needs from the
//! renderer that owns the scene, its GPU and its shading programs.

use crate::emitter::EmitterId;
use crate::error::BackendError;
use crate::mask::VisibilityMask;
use crate::params::ParameterBlock;
use crate::program::ShadingProgram;
use crate::targets::{ClearMode, FilterMode, TargetDesc, TargetId};
use crate::view::ViewSetup;

/// Render backend the compositor drives. Calls are issued in submission
/// order on one thread; each call sees the completed results of earlier ones.
pub trait LightingBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, BackendError>;

    /// Free a target. Unknown ids are ignored.
    fn destroy_target(&mut self, target: TargetId);

    fn set_filter_mode(&mut self, target: TargetId, filter: FilterMode) -> Result<(), BackendError>;

    fn filter_mode(&self, target: TargetId) -> Option<FilterMode>;

    /// Whether `program` can be resolved. Queried at setup only.
    fn has_program(&self, program: ShadingProgram) -> bool;

    /// Draw every object whose tags intersect `mask` with its own material.
    fn render_from(
        &mut self,
        view: &ViewSetup,
        mask: VisibilityMask,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError>;

    /// Same as [`LightingBackend::render_from`] with every material replaced by `program`.
    fn render_with_override_shading(
        &mut self,
        view: &ViewSetup,
        mask: VisibilityMask,
        program: ShadingProgram,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError>;

    /// Draw one emitter's light geometry, with its own routine or `program`.
    fn render_emitter(
        &mut self,
        view: &ViewSetup,
        emitter: EmitterId,
        program: Option<ShadingProgram>,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError>;

    /// Fullscreen pass from `source` into `destination`; a plain copy when `program` is `None`.
    fn blit(
        &mut self,
        source: TargetId,
        destination: TargetId,
        program: Option<ShadingProgram>,
        params: &ParameterBlock,
    ) -> Result<(), BackendError>;
}
