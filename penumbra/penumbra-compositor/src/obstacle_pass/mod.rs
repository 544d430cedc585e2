//! Obstacle pass: light-blocking geometry into the extended obstacle buffer.

use render_api::{ClearMode, ShadingProgram, ViewSetup, VisibilityMask};

use crate::error::CompositorError;
use crate::graph::{FrameContext, FrameNode, ResourceUsage};
use crate::pool::BufferId;

pub struct ObstaclePass {
    /// Extended light view.
    pub view: ViewSetup,
    /// Render at 2x into `ObstacleUpsample`, then downsample.
    pub antialiasing: bool,
    /// Run the opacity override sub-pass over `OPACITY_OVERRIDE` objects.
    pub opacity_override: bool,
}

impl ObstaclePass {
    pub fn usage(&self) -> Vec<(BufferId, ResourceUsage)> {
        let mut usage = vec![(BufferId::Obstacle, ResourceUsage::Write)];
        if self.antialiasing {
            usage.push((BufferId::ObstacleUpsample, ResourceUsage::Write));
        }
        usage
    }
}

impl FrameNode for ObstaclePass {
    fn name(&self) -> &str {
        "obstacles"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let buffer = if self.antialiasing { BufferId::ObstacleUpsample } else { BufferId::Obstacle };
        let target = ctx.pool.target(buffer)?;
        ctx.backend.render_from(&self.view, VisibilityMask::OBSTACLE, target, ClearMode::TRANSPARENT, ctx.params)?;
        if self.opacity_override {
            ctx.backend.render_with_override_shading(
                &self.view,
                VisibilityMask::OPACITY_OVERRIDE,
                ShadingProgram::ObstacleOpacity,
                target,
                ClearMode::Keep,
                ctx.params,
            )?;
        }
        ctx.pool.mark_written(buffer);
        if self.antialiasing {
            let obstacle = ctx.pool.target(BufferId::Obstacle)?;
            ctx.backend.blit(target, obstacle, Some(ShadingProgram::ObstacleDownsample), ctx.params)?;
            ctx.pool.mark_written(BufferId::Obstacle);
        }
        Ok(())
    }
}
