//! Shared demo scene for the debug programs: a lit floor, a few walls, a
//! tinted pane, two point lights, a line light and an ambient sky strip.

use penumbra_compositor::{ActiveEmitter, EmitterRegistry, PipelineConfig, ViewerState};
use render_api::{
    BackendError, ClearMode, EmitterId, ExtractedObject, ExtractedScene, LightEmitter, LightingBackend, ParameterBlock,
    TargetId, VisibilityMask,
};

pub const SCREEN_SIZE: (u32, u32) = (640, 400);

const FLOOR: u64 = 1;
const SKY: u64 = 2;
const WALLS: u64 = 10;
const LIGHTS: u64 = 100;

pub fn demo_viewer(screen_size: (u32, u32)) -> ViewerState {
    ViewerState::orthographic([0.0, 0.0, -10.0], 5.0, screen_size)
}

pub fn demo_config() -> PipelineConfig {
    PipelineConfig { light_pixel_density: 12.0, obstacle_antialiasing: true, normal_mapping_enabled: true, ..Default::default() }
}

/// Emitters of the demo at `time` seconds; the second light orbits.
pub fn demo_emitters(time: f32) -> Vec<LightEmitter> {
    let orbit = [3.0 * time.cos(), 2.0 * time.sin(), 1.0];
    vec![
        LightEmitter::point(EmitterId(1), [-4.0, 1.5, 1.0], [1.0, 0.8, 0.5, 1.0], 5.0),
        LightEmitter::point(EmitterId(2), orbit, [0.5, 0.6, 1.0, 1.0], 4.0),
        LightEmitter::line(EmitterId(3), [2.5, -3.0, 0.5], [2.0, 1.0], [0.4, 1.0, 0.6, 1.0], 3.0),
    ]
}

fn wall(id: u64, center: [f32; 2], half_extent: [f32; 2], color: [f32; 4]) -> ExtractedObject {
    ExtractedObject::quad(id, [center[0], center[1], 0.0], half_extent, color, VisibilityMask::SCENE | VisibilityMask::OBSTACLE)
}

/// A right triangle obstacle built from raw vertex data.
fn wedge(id: u64, center: [f32; 2], size: f32) -> ExtractedObject {
    let vertices: [f32; 12] = [
        -size, -size, 0.0, 1.0,
        size, -size, 1.0, 1.0,
        -size, size, 0.0, 0.0,
    ];
    let indices: [u32; 3] = [0, 1, 2];
    ExtractedObject {
        vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
        index_data: bytemuck::cast_slice(&indices).to_vec(),
        // drawn by a material that cannot write opacity itself
        tags: VisibilityMask::SCENE | VisibilityMask::OBSTACLE | VisibilityMask::OPACITY_OVERRIDE,
        color: [0.3, 0.25, 0.2, 1.0],
        ..ExtractedObject::quad(id, [center[0], center[1], 0.0], [size, size], [1.0; 4], VisibilityMask::empty())
    }
}

/// Scene objects plus the light geometry of `emitters`.
pub fn demo_scene(emitters: &[LightEmitter]) -> ExtractedScene {
    let mut scene = ExtractedScene::new();
    scene.insert(
        ExtractedObject::quad(FLOOR, [0.0; 3], [9.0, 6.0], [0.85, 0.85, 0.8, 1.0], VisibilityMask::SCENE | VisibilityMask::NORMAL_MAPPED),
    );
    scene.insert(ExtractedObject::quad(SKY, [0.0, 5.5, 0.0], [9.0, 0.5], [0.15, 0.2, 0.4, 1.0], VisibilityMask::AMBIENT_EMISSION));
    scene.insert(wall(WALLS, [-1.5, 0.0], [0.3, 2.5], [0.2, 0.2, 0.25, 1.0]));
    scene.insert(wall(WALLS + 1, [1.0, 2.5], [2.0, 0.3], [0.2, 0.2, 0.25, 1.0]));
    scene.insert(wall(WALLS + 2, [4.5, -0.5], [0.2, 1.5], [1.0, 0.2, 0.2, 0.6]));
    scene.insert(
        ExtractedObject::quad(WALLS + 3, [-5.0, -3.0, 0.0], [1.0, 1.0], [0.7, 0.7, 0.7, 1.0], VisibilityMask::SCENE | VisibilityMask::NORMAL_MAPPED)
            .with_normal([0.6, 0.0, 0.8]),
    );
    scene.insert(wedge(WALLS + 4, [-2.0, -3.0], 1.0));
    for emitter in emitters {
        scene.insert(ExtractedObject::light_for(LIGHTS + emitter.id.0, emitter));
    }
    scene
}

/// Activate every emitter in `registry`; they stay registered while the guards live.
pub fn activate_all(registry: &EmitterRegistry, emitters: &[LightEmitter]) -> Vec<ActiveEmitter> {
    emitters.iter().map(|e| registry.activate(*e)).collect()
}

/// Move the activated emitters to their positions in `emitters`.
pub fn sync_emitters(active: &[ActiveEmitter], emitters: &[LightEmitter]) {
    for (guard, emitter) in active.iter().zip(emitters) {
        guard.update(|e| e.translate_to(emitter.origin));
    }
}

/// Draw the unlit scene into `target` from the viewer's camera.
pub fn render_scene(
    backend: &mut dyn LightingBackend,
    viewer: &ViewerState,
    target: TargetId,
) -> Result<(), BackendError> {
    backend.render_from(&viewer.view(), VisibilityMask::SCENE, target, ClearMode::Color([0.0, 0.0, 0.0, 1.0]), &ParameterBlock::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::{EmitterShape, Rect};

    #[test]
    fn scene_has_geometry_for_every_emitter() {
        let emitters = demo_emitters(0.0);
        let scene = demo_scene(&emitters);
        for e in &emitters {
            assert_eq!(scene.emitter_geometry(e.id).len(), 1, "{:?}", e.id);
        }
        assert_eq!(scene.matching(VisibilityMask::OPACITY_OVERRIDE).len(), 1);
        assert_eq!(scene.matching(VisibilityMask::AMBIENT_EMISSION).len(), 1);
        let line = scene.emitter_geometry(EmitterId(3))[0];
        assert_eq!(line.light_segment, [2.0, 1.0]);
        assert_eq!(line.light_radius, 3.0);
        assert!(matches!(emitters[2].shape, EmitterShape::Line { .. }));
    }

    #[test]
    fn moved_emitters_follow_their_guards() {
        let registry = EmitterRegistry::new();
        let active = activate_all(&registry, &demo_emitters(0.0));
        let later = demo_emitters(1.0);
        sync_emitters(&active, &later);
        let everything = Rect::new([-100.0, -100.0], [100.0, 100.0]);
        let orbit = registry.snapshot(&everything).into_iter().find(|e| e.id == EmitterId(2));
        assert_eq!(orbit.map(|e| e.origin), Some(later[1].origin));
        drop(active);
        assert!(registry.is_empty());
    }
}
