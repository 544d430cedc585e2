//! Separable blur with a widening kernel, run in place on a pooled buffer.

use render_api::{FilterMode, ParamName, ShadingProgram};

use crate::error::CompositorError;
use crate::graph::{FrameContext, FrameNode, ResourceUsage};
use crate::pool::BufferId;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurSettings {
    pub radius: f32,
    pub downsample: u32,
    pub iterations: u32,
}

impl BlurSettings {
    /// Tap distance in texels for iteration `index`.
    pub fn step(&self, index: u32) -> f32 {
        self.radius * self.downsample as f32 + index as f32
    }
}

/// Blur `source` in place, using `partner` (same size) as scratch.
///
/// Each iteration runs a horizontal pass `source -> partner` then a vertical
/// pass `partner -> source`, so the result always ends up in `source`.
/// Both buffers sample bilinearly while blurring and get their previous
/// filter back afterwards, including when a pass fails.
pub fn blur(
    ctx: &mut FrameContext<'_>,
    source: BufferId,
    partner: BufferId,
    settings: &BlurSettings,
) -> Result<(), CompositorError> {
    if settings.iterations == 0 {
        return Ok(());
    }
    let source_filter = ctx.pool.set_filter(ctx.backend, source, FilterMode::Bilinear)?;
    let partner_filter = match ctx.pool.set_filter(ctx.backend, partner, FilterMode::Bilinear) {
        Ok(f) => f,
        Err(e) => {
            ctx.pool.set_filter(ctx.backend, source, source_filter)?;
            return Err(e.into());
        }
    };
    let result = run_iterations(ctx, source, partner, settings);
    ctx.params.remove(ParamName::BlurStep);
    let restored_source = ctx.pool.set_filter(ctx.backend, source, source_filter);
    let restored_partner = ctx.pool.set_filter(ctx.backend, partner, partner_filter);
    result?;
    restored_source?;
    restored_partner?;
    Ok(())
}

fn run_iterations(
    ctx: &mut FrameContext<'_>,
    source: BufferId,
    partner: BufferId,
    settings: &BlurSettings,
) -> Result<(), CompositorError> {
    let src = ctx.pool.target(source)?;
    let dst = ctx.pool.target(partner)?;
    for i in 0..settings.iterations {
        ctx.params.set_float(ParamName::BlurStep, settings.step(i));
        ctx.backend.blit(src, dst, Some(ShadingProgram::BlurHorizontal), ctx.params)?;
        ctx.backend.blit(dst, src, Some(ShadingProgram::BlurVertical), ctx.params)?;
    }
    ctx.pool.mark_written(partner);
    ctx.pool.mark_written(source);
    Ok(())
}

/// Blurs the accumulated light source buffer.
pub struct LightBlurPass {
    pub settings: BlurSettings,
}

impl LightBlurPass {
    pub fn usage() -> Vec<(BufferId, ResourceUsage)> {
        vec![
            (BufferId::LightSource, ResourceUsage::ReadWrite),
            (BufferId::LightSourceBlur, ResourceUsage::ReadWrite),
        ]
    }
}

impl FrameNode for LightBlurPass {
    fn name(&self) -> &str {
        "light_blur"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        blur(ctx, BufferId::LightSource, BufferId::LightSourceBlur, &self.settings)
    }
}
