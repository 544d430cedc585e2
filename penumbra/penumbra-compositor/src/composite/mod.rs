//! Final composite: scene colour times (light + ambient), written to the
//! viewer's destination.

use render_api::{LightingBackend, ParamName, ParameterBlock, ShadingProgram, TargetId};

use crate::error::CompositorError;
use crate::graph::{FrameContext, FrameNode, ResourceUsage};
use crate::planner::LightResolutions;
use crate::pool::BufferId;

/// How screen uv maps into small light buffer uv:
/// `light_uv = (screen_uv - 0.5) * uv_scale + 0.5 + uv_offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeMapping {
    pub uv_scale: [f32; 2],
    /// Snapping residual; equals the `TexelPositionOffset` parameter.
    pub uv_offset: [f32; 2],
}

/// Mapping for a viewer at `viewer` whose light viewer sits at `light_viewer`
/// (its texel-snapped position) and sees `screen_half_extent` of the plane.
pub fn composite_mapping(
    viewer: [f32; 3],
    light_viewer: [f32; 3],
    screen_half_extent: [f32; 2],
    resolutions: &LightResolutions,
) -> CompositeMapping {
    let [sw, sh] = resolutions.small_extent;
    CompositeMapping {
        uv_scale: [2.0 * screen_half_extent[0] / sw, 2.0 * screen_half_extent[1] / sh],
        // uv `v` points down while world `y` points up.
        uv_offset: [(viewer[0] - light_viewer[0]) / sw, -(viewer[1] - light_viewer[1]) / sh],
    }
}

/// Copy the scene to the destination without lighting.
pub fn blit_unlit(
    backend: &mut dyn LightingBackend,
    scene: TargetId,
    destination: TargetId,
    isolated: bool,
    params: &ParameterBlock,
) -> Result<(), CompositorError> {
    if scene == destination {
        return Ok(());
    }
    let program = isolated.then_some(ShadingProgram::AlphaOver);
    backend.blit(scene, destination, program, params)?;
    Ok(())
}

pub struct CompositePass {
    pub scene: TargetId,
    pub destination: TargetId,
    pub mapping: CompositeMapping,
    pub ambient: bool,
    /// Alpha blend over the destination instead of replacing it.
    pub isolated: bool,
}

impl CompositePass {
    pub fn usage(&self) -> Vec<(BufferId, ResourceUsage)> {
        let mut usage = vec![(BufferId::LightSource, ResourceUsage::Read)];
        if self.ambient {
            usage.push((BufferId::AmbientA, ResourceUsage::Read));
            usage.push((BufferId::AmbientB, ResourceUsage::Read));
        }
        usage.push((BufferId::ScreenComposite, ResourceUsage::Write));
        usage
    }
}

impl FrameNode for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let light = ctx.pool.target(BufferId::LightSource)?;
        let ambient_buffer = ctx.ambient.current();
        let ambient = if self.ambient && ctx.pool.is_valid(ambient_buffer) {
            Some(ctx.pool.target(ambient_buffer)?)
        } else {
            None
        };
        ctx.params.set_texture(ParamName::LightSourceTexture, Some(light));
        ctx.params.set_texture(ParamName::AmbientTexture, ambient);
        ctx.params.set_vec2(ParamName::CompositeUvScale, self.mapping.uv_scale);
        ctx.params.set_vec2(ParamName::CompositeUvOffset, self.mapping.uv_offset);

        let composite = ctx.pool.target(BufferId::ScreenComposite)?;
        ctx.backend.blit(self.scene, composite, Some(ShadingProgram::Composite), ctx.params)?;
        ctx.pool.mark_written(BufferId::ScreenComposite);
        let program = self.isolated.then_some(ShadingProgram::AlphaOver);
        ctx.backend.blit(composite, self.destination, program, ctx.params)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use render_api::Projection;

    #[test]
    fn mapping_offsets_by_snapping_residual() {
        let projection = Projection::Orthographic { half_height: 5.0, aspect: 1.6 };
        let res = plan(&projection, 0.0, 10.0, 1.0).unwrap();
        let mapping = composite_mapping([0.04, 0.03, -10.0], [0.0, 0.0, -10.0], [8.0, 5.0], &res);
        assert!((mapping.uv_scale[0] - 16.0 / res.small_extent[0]).abs() < 1e-6);
        assert!(mapping.uv_offset[0] > 0.0);
        assert!(mapping.uv_offset[1] < 0.0);
        let centred = composite_mapping([1.0, 1.0, -10.0], [1.0, 1.0, -10.0], [8.0, 5.0], &res);
        assert_eq!(centred.uv_offset, [0.0, 0.0]);
    }
}
