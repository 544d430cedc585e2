//! Data types for extraction from the host scene into the render world.
//! Used by every lighting backend; the host fills these each frame.

use std::collections::HashMap;

use crate::emitter::{EmitterId, EmitterShape, LightEmitter};
use crate::mask::VisibilityMask;
use crate::view::{translation, IDENTITY};

/// Bytes per vertex: position `xy` then uv `xy`, all `f32`.
pub const VERTEX_STRIDE: usize = 16;

/// Per-object data extracted from the scene.
#[derive(Clone, Debug)]
pub struct ExtractedObject {
    /// Host-defined entity or instance id. Draw order follows ascending ids.
    pub entity_id: u64,
    /// Vertex data, [`VERTEX_STRIDE`] bytes per vertex.
    pub vertex_data: Vec<u8>,
    /// Index data (u32 indices).
    pub index_data: Vec<u8>,
    /// World transform: column-major 4x4 matrix. For emitter geometry the
    /// translation is the light origin.
    pub transform: [f32; 16],
    /// Flat material colour. Obstacles store their tint in `rgb` and opacity in `a`.
    pub color: [f32; 4],
    pub tags: VisibilityMask,
    /// Set when this geometry is the light shape of an emitter.
    pub emitter: Option<EmitterId>,
    /// Emitter geometry only: far end of the light segment relative to the
    /// origin (zero for point lights). Its mesh uv is the world offset from
    /// the origin, and light falls off over `light_radius` from the segment.
    pub light_segment: [f32; 2],
    pub light_radius: f32,
    /// Surface normal written by the normal buffer pass.
    pub normal: [f32; 3],
    pub visible: bool,
}

impl ExtractedObject {
    /// An axis-aligned quad centred on `center` with uv spanning `[0, 1]`.
    pub fn quad(entity_id: u64, center: [f32; 3], half_extent: [f32; 2], color: [f32; 4], tags: VisibilityMask) -> Self {
        let [hx, hy] = half_extent;
        let vertices: [f32; 16] = [
            -hx, -hy, 0.0, 1.0,
            hx, -hy, 1.0, 1.0,
            hx, hy, 1.0, 0.0,
            -hx, hy, 0.0, 0.0,
        ];
        let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];
        Self {
            entity_id,
            vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
            index_data: bytemuck::cast_slice(&indices).to_vec(),
            transform: translation(center),
            color,
            tags,
            emitter: None,
            light_segment: [0.0, 0.0],
            light_radius: 0.0,
            normal: [0.0, 0.0, 1.0],
            visible: true,
        }
    }

    /// Light geometry for a point emitter: a quad of `radius` around `origin`.
    pub fn light_quad(entity_id: u64, emitter: EmitterId, origin: [f32; 3], radius: f32, color: [f32; 4]) -> Self {
        Self::light_segment(entity_id, emitter, origin, [0.0, 0.0], radius, color)
    }

    /// Light geometry for a line emitter from `origin` to `origin + end`: the
    /// capsule of `radius` around the segment, drawn as its bounding quad.
    pub fn light_segment(
        entity_id: u64,
        emitter: EmitterId,
        origin: [f32; 3],
        end: [f32; 2],
        radius: f32,
        color: [f32; 4],
    ) -> Self {
        let (x0, x1) = (end[0].min(0.0) - radius, end[0].max(0.0) + radius);
        let (y0, y1) = (end[1].min(0.0) - radius, end[1].max(0.0) + radius);
        // uv repeats the local position.
        let vertices: [f32; 16] = [
            x0, y0, x0, y0,
            x1, y0, x1, y0,
            x1, y1, x1, y1,
            x0, y1, x0, y1,
        ];
        let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];
        Self {
            entity_id,
            vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
            index_data: bytemuck::cast_slice(&indices).to_vec(),
            transform: translation(origin),
            color,
            tags: VisibilityMask::LIGHT_SOURCE,
            emitter: Some(emitter),
            light_segment: end,
            light_radius: radius,
            ..Self::default()
        }
    }

    /// Light geometry matching `emitter`'s shape and reach.
    pub fn light_for(entity_id: u64, emitter: &LightEmitter) -> Self {
        let end = match emitter.shape {
            EmitterShape::Point => [0.0, 0.0],
            EmitterShape::Line { end } => end,
        };
        Self::light_segment(entity_id, emitter.id, emitter.origin, end, emitter.reach(), emitter.color)
    }

    pub fn with_normal(mut self, normal: [f32; 3]) -> Self {
        self.normal = normal;
        self
    }

    /// Translation part of the transform.
    pub fn origin(&self) -> [f32; 3] {
        [self.transform[12], self.transform[13], self.transform[14]]
    }

    /// Vertices as `(position, uv)` pairs.
    pub fn vertices(&self) -> Vec<([f32; 2], [f32; 2])> {
        let floats: Vec<f32> = self
            .vertex_data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        floats
            .chunks_exact(VERTEX_STRIDE / 4)
            .map(|v| ([v[0], v[1]], [v[2], v[3]]))
            .collect()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.index_data
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

impl Default for ExtractedObject {
    fn default() -> Self {
        Self {
            entity_id: 0,
            vertex_data: Vec::new(),
            index_data: Vec::new(),
            transform: IDENTITY,
            color: [1.0; 4],
            tags: VisibilityMask::empty(),
            emitter: None,
            light_segment: [0.0, 0.0],
            light_radius: 0.0,
            normal: [0.0, 0.0, 1.0],
            visible: true,
        }
    }
}

/// All extracted objects for the current frame.
#[derive(Default, Debug, Clone)]
pub struct ExtractedScene {
    pub objects: HashMap<u64, ExtractedObject>,
}

impl ExtractedScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: ExtractedObject) {
        self.objects.insert(object.entity_id, object);
    }

    /// Visible objects whose tags intersect `mask`, in draw order.
    pub fn matching(&self, mask: VisibilityMask) -> Vec<&ExtractedObject> {
        let mut out: Vec<&ExtractedObject> = self
            .objects
            .values()
            .filter(|o| o.visible && o.tags.intersects(mask))
            .collect();
        out.sort_by_key(|o| o.entity_id);
        out
    }

    /// Visible light geometry of one emitter, in draw order.
    pub fn emitter_geometry(&self, emitter: EmitterId) -> Vec<&ExtractedObject> {
        let mut out: Vec<&ExtractedObject> = self
            .objects
            .values()
            .filter(|o| o.visible && o.emitter == Some(emitter))
            .collect();
        out.sort_by_key(|o| o.entity_id);
        out
    }
}
