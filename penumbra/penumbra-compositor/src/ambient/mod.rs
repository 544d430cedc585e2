//! Ambient integrator: a temporally accumulated, obstacle-attenuated light
//! field at extended resolution.

use render_api::{ClearMode, ParamName, ShadingProgram, ViewSetup, VisibilityMask};

use crate::blur::{blur, BlurSettings};
use crate::error::CompositorError;
use crate::graph::{FrameContext, FrameNode, ResourceUsage};
use crate::planner::BufferSize;
use crate::pool::BufferId;

/// The ping-pong pair; `AmbientState::current` indexes into it.
pub const AMBIENT_BUFFERS: [BufferId; 2] = [BufferId::AmbientA, BufferId::AmbientB];

/// Integration state that outlives a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AmbientState {
    current: usize,
    last_position: Option<[f32; 2]>,
    extra_cycles: u32,
    steps_last_frame: u32,
}

impl AmbientState {
    /// Buffer holding the latest integrated field.
    pub fn current(&self) -> BufferId {
        AMBIENT_BUFFERS[self.current]
    }

    pub fn previous(&self) -> BufferId {
        AMBIENT_BUFFERS[self.current ^ 1]
    }

    fn swap(&mut self) {
        self.current ^= 1;
    }

    /// Run `cycles` more integration steps on the next frame only.
    pub fn request_extra_cycles(&mut self, cycles: u32) {
        self.extra_cycles = self.extra_cycles.saturating_add(cycles);
    }

    pub fn extra_cycles(&self) -> u32 {
        self.extra_cycles
    }

    pub(crate) fn end_frame(&mut self) {
        self.extra_cycles = 0;
    }

    /// Forget where the light viewer was, so the next step does not shift history.
    pub fn reset_history(&mut self) {
        self.last_position = None;
    }

    pub fn steps_last_frame(&self) -> u32 {
        self.steps_last_frame
    }
}

/// History shift for a light viewer move of `delta` world units, in buffer uv
/// with `x` right and `y` up.
pub fn ambient_shift(delta: [f32; 2], density: f32, size: BufferSize) -> [f32; 2] {
    [delta[0] * density / size.width as f32, delta[1] * density / size.height as f32]
}

/// A shift of a whole buffer or more leaves nothing of the history on screen.
pub fn is_teleport(shift: [f32; 2]) -> bool {
    shift[0].abs() >= 1.0 || shift[1].abs() >= 1.0
}

pub struct AmbientPass {
    /// Extended light view, already snapped to the texel grid.
    pub view: ViewSetup,
    pub size: BufferSize,
    pub density: f32,
    pub persistence: f32,
    pub cycles: u32,
    pub blur: Option<BlurSettings>,
}

impl AmbientPass {
    pub fn usage() -> Vec<(BufferId, ResourceUsage)> {
        vec![
            (BufferId::Obstacle, ResourceUsage::Read),
            (BufferId::AmbientEmission, ResourceUsage::Write),
            (BufferId::AmbientA, ResourceUsage::ReadWrite),
            (BufferId::AmbientB, ResourceUsage::ReadWrite),
        ]
    }
}

impl FrameNode for AmbientPass {
    fn name(&self) -> &str {
        "ambient"
    }

    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        let emission = ctx.pool.target(BufferId::AmbientEmission)?;
        ctx.backend
            .render_from(&self.view, VisibilityMask::AMBIENT_EMISSION, emission, ClearMode::TRANSPARENT, ctx.params)?;
        ctx.pool.mark_written(BufferId::AmbientEmission);
        ctx.params.set_float(ParamName::AmbientPersistence, self.persistence);

        let position = [self.view.position[0], self.view.position[1]];
        let steps = self.cycles + ctx.ambient.extra_cycles;
        for step in 0..steps {
            ctx.ambient.swap();
            let delta = match ctx.ambient.last_position {
                Some(last) if step == 0 => [position[0] - last[0], position[1] - last[1]],
                _ => [0.0, 0.0],
            };
            let shift = ambient_shift(delta, self.density, self.size);
            let previous = ctx.ambient.previous();
            let current = ctx.ambient.current();
            if is_teleport(shift) {
                log::debug!("ambient: viewer jumped {delta:?}, discarding history");
                ctx.pool.discard(previous);
            }
            let history = if ctx.pool.is_valid(previous) { Some(ctx.pool.target(previous)?) } else { None };
            ctx.params.set_texture(ParamName::PreviousAmbient, history);
            ctx.params.set_vec2(ParamName::AmbientShift, shift);
            let target = ctx.pool.target(current)?;
            ctx.backend.blit(emission, target, Some(ShadingProgram::AmbientIntegrate), ctx.params)?;
            ctx.pool.mark_written(current);
            ctx.ambient.last_position = Some(position);
            if let Some(settings) = &self.blur {
                blur(ctx, current, previous, settings)?;
            }
        }
        ctx.params.remove(ParamName::PreviousAmbient);
        ctx.params.set_vec2(ParamName::AmbientShift, [0.0, 0.0]);
        ctx.ambient.steps_last_frame = steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_alternates() {
        let mut state = AmbientState::default();
        assert_eq!(state.current(), BufferId::AmbientA);
        state.swap();
        assert_eq!(state.current(), BufferId::AmbientB);
        assert_eq!(state.previous(), BufferId::AmbientA);
    }

    #[test]
    fn shift_is_in_buffer_uv() {
        let shift = ambient_shift([1.0, -0.5], 10.0, BufferSize::new(100, 50));
        assert_eq!(shift, [0.1, -0.1]);
        assert!(!is_teleport(shift));
        assert!(is_teleport(ambient_shift([10.0, 0.0], 10.0, BufferSize::new(100, 50))));
    }

    #[test]
    fn extra_cycles_accumulate_until_frame_end() {
        let mut state = AmbientState::default();
        state.request_extra_cycles(3);
        state.request_extra_cycles(2);
        assert_eq!(state.extra_cycles(), 5);
        state.end_frame();
        assert_eq!(state.extra_cycles(), 0);
    }
}
