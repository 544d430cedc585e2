//! Light source passes: shared light parameters, the normal buffer and emitter
//! light accumulation, batched or one emitter at a time.

use render_api::{ClearMode, LightEmitter, ParamName, ShadingProgram, ViewSetup, VisibilityMask};

use crate::error::CompositorError;
use crate::graph::{FrameContext, FrameGraph, FrameNode, NodeId, ResourceUsage};
use crate::pool::BufferId;

/// Encoded flat normal `(0, 0, 1)`.
pub const FLAT_NORMAL: [f32; 4] = [0.5, 0.5, 1.0, 1.0];

/// Publishes the per-frame parameters every light program reads.
pub struct LightParamsPass {
    pub density: f32,
    pub extended_to_small: [f32; 2],
    pub texel_offset: [f32; 2],
    pub hdr: bool,
    pub perspective: bool,
}

impl LightParamsPass {
    pub fn usage() -> Vec<(BufferId, ResourceUsage)> {
        vec![(BufferId::Obstacle, ResourceUsage::Read)]
    }
}

impl FrameNode for LightParamsPass {
    fn name(&self) -> &str {
        "light_params"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let obstacle = ctx.pool.target(BufferId::Obstacle)?;
        let p = &mut *ctx.params;
        p.set_texture(ParamName::ObstacleTexture, Some(obstacle));
        p.set_float(ParamName::PixelDensity, self.density);
        p.set_vec2(ParamName::ExtendedToSmallScale, self.extended_to_small);
        p.set_vec2(ParamName::TexelPositionOffset, self.texel_offset);
        p.set_flag(ParamName::HdrEnabled, self.hdr);
        p.set_flag(ParamName::PerspectiveEnabled, self.perspective);
        Ok(())
    }
}

/// Scene normals at small resolution for per-emitter normal mapping.
pub struct NormalPass {
    pub view: ViewSetup,
}

impl FrameNode for NormalPass {
    fn name(&self) -> &str {
        "normals"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let normals = ctx.pool.target(BufferId::Normals)?;
        ctx.backend.render_with_override_shading(
            &self.view,
            VisibilityMask::NORMAL_MAPPED,
            ShadingProgram::NormalBuffer,
            normals,
            ClearMode::Color(FLAT_NORMAL),
            ctx.params,
        )?;
        ctx.pool.mark_written(BufferId::Normals);
        ctx.params.set_texture(ParamName::NormalTexture, Some(normals));
        Ok(())
    }
}

/// Every visible emitter in one draw, each with its own light routine.
pub struct BatchedLightPass {
    pub view: ViewSetup,
}

impl FrameNode for BatchedLightPass {
    fn name(&self) -> &str {
        "light_source"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let light = ctx.pool.target(BufferId::LightSource)?;
        ctx.backend.render_from(&self.view, VisibilityMask::LIGHT_SOURCE, light, ClearMode::TRANSPARENT, ctx.params)?;
        ctx.pool.mark_written(BufferId::LightSource);
        Ok(())
    }
}

struct ClearLightPass {
    view: ViewSetup,
}

impl FrameNode for ClearLightPass {
    fn name(&self) -> &str {
        "light_source_clear"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let light = ctx.pool.target(BufferId::LightSource)?;
        ctx.backend.render_from(&self.view, VisibilityMask::empty(), light, ClearMode::TRANSPARENT, ctx.params)?;
        ctx.pool.mark_written(BufferId::LightSource);
        Ok(())
    }
}

struct EmitterColorPass {
    view: ViewSetup,
    emitter: LightEmitter,
}

impl FrameNode for EmitterColorPass {
    fn name(&self) -> &str {
        "emitter_color"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let color = ctx.pool.target(BufferId::EmitterColor)?;
        ctx.backend.render_emitter(&self.view, self.emitter.id, None, color, ClearMode::TRANSPARENT, ctx.params)?;
        ctx.pool.mark_written(BufferId::EmitterColor);
        Ok(())
    }
}

struct EmitterShadingPass {
    view: ViewSetup,
    emitter: LightEmitter,
}

impl FrameNode for EmitterShadingPass {
    fn name(&self) -> &str {
        "emitter_shading"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let [ox, oy, oz] = self.emitter.origin;
        let [ex, ey, ez] = self.emitter.segment_end();
        ctx.params.set_vec4(ParamName::LightOrigin, [ox, oy, oz, 0.0]);
        ctx.params.set_vec4(ParamName::LightSegmentEnd, [ex, ey, ez, 0.0]);
        let shading = ctx.pool.target(BufferId::EmitterShading)?;
        ctx.backend.render_emitter(
            &self.view,
            self.emitter.id,
            Some(ShadingProgram::NormalMappedLight),
            shading,
            ClearMode::TRANSPARENT,
            ctx.params,
        )?;
        ctx.pool.mark_written(BufferId::EmitterShading);
        Ok(())
    }
}

struct EmitterBlendPass;

impl FrameNode for EmitterBlendPass {
    fn name(&self) -> &str {
        "emitter_blend"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let color = ctx.pool.target(BufferId::EmitterColor)?;
        let shading = ctx.pool.target(BufferId::EmitterShading)?;
        let light = ctx.pool.target(BufferId::LightSource)?;
        ctx.params.set_texture(ParamName::EmitterColorTexture, Some(color));
        ctx.backend.blit(shading, light, Some(ShadingProgram::LightBlend), ctx.params)?;
        ctx.params.remove(ParamName::EmitterColorTexture);
        Ok(())
    }
}

/// Add the light source stage to `graph`. Returns the node that leaves the
/// finished light buffer behind.
///
/// Batched mode draws every emitter at once. Per-emitter mode clears the
/// light buffer, then for each emitter renders its colour and its
/// normal-mapped shading into scratch buffers and additively blends the
/// product into the light buffer.
pub fn add_light_source_passes<'n>(
    graph: &mut FrameGraph<'n>,
    view: ViewSetup,
    emitters: &[LightEmitter],
    normal_mapped: bool,
) -> NodeId {
    if !normal_mapped {
        return graph.add_node(
            Box::new(BatchedLightPass { view }),
            vec![(BufferId::Obstacle, ResourceUsage::Read), (BufferId::LightSource, ResourceUsage::Write)],
        );
    }
    let mut last = graph.add_node(Box::new(ClearLightPass { view }), vec![(BufferId::LightSource, ResourceUsage::Write)]);
    for emitter in emitters {
        graph.add_node(
            Box::new(EmitterColorPass { view, emitter: *emitter }),
            vec![(BufferId::Obstacle, ResourceUsage::Read), (BufferId::EmitterColor, ResourceUsage::Write)],
        );
        graph.add_node(
            Box::new(EmitterShadingPass { view, emitter: *emitter }),
            vec![(BufferId::Normals, ResourceUsage::Read), (BufferId::EmitterShading, ResourceUsage::Write)],
        );
        last = graph.add_node(
            Box::new(EmitterBlendPass),
            vec![
                (BufferId::EmitterColor, ResourceUsage::Read),
                (BufferId::EmitterShading, ResourceUsage::Read),
                (BufferId::LightSource, ResourceUsage::ReadWrite),
            ],
        );
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::{EmitterId, Projection};

    #[test]
    fn per_emitter_mode_adds_three_nodes_per_emitter() {
        let view = ViewSetup::new([0.0; 3], Projection::Orthographic { half_height: 4.0, aspect: 1.0 }, 10.0);
        let emitters = [
            LightEmitter::point(EmitterId(1), [0.0; 3], [1.0; 4], 2.0),
            LightEmitter::point(EmitterId(2), [1.0, 0.0, 0.0], [1.0; 4], 2.0),
        ];
        let mut graph = FrameGraph::new();
        let last = add_light_source_passes(&mut graph, view, &emitters, true);
        assert_eq!(graph.len(), 7);
        assert_eq!(last, NodeId(6));
        let mut batched = FrameGraph::new();
        add_light_source_passes(&mut batched, view, &emitters, false);
        assert_eq!(batched.len(), 1);
    }
}
