//! Light emitter data handed from the scene to the compositor.

use crate::view::Rect;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmitterId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EmitterShape {
    Point,
    /// Segment from the origin to `origin + end` on the lit plane.
    Line { end: [f32; 2] },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightEmitter {
    pub id: EmitterId,
    pub shape: EmitterShape,
    /// World position; `z` is the height above the lit plane used by normal mapping.
    pub origin: [f32; 3],
    pub color: [f32; 4],
    /// World bounds of everything the emitter can light, used for culling.
    pub bounds: Rect,
}

impl LightEmitter {
    /// A point emitter lighting a square of `radius` around its origin.
    pub fn point(id: EmitterId, origin: [f32; 3], color: [f32; 4], radius: f32) -> Self {
        Self {
            id,
            shape: EmitterShape::Point,
            origin,
            color,
            bounds: Rect::from_center([origin[0], origin[1]], [radius, radius]),
        }
    }

    /// A line emitter from `origin` to `origin + end`, lighting `radius` around the segment.
    pub fn line(id: EmitterId, origin: [f32; 3], end: [f32; 2], color: [f32; 4], radius: f32) -> Self {
        let (x0, y0) = (origin[0], origin[1]);
        let (x1, y1) = (x0 + end[0], y0 + end[1]);
        Self {
            id,
            shape: EmitterShape::Line { end },
            origin,
            color,
            bounds: Rect::new([x0.min(x1) - radius, y0.min(y1) - radius], [x0.max(x1) + radius, y0.max(y1) + radius]),
        }
    }

    /// How far light reaches past the point or segment, recovered from the bounds.
    pub fn reach(&self) -> f32 {
        let (w, h) = (self.bounds.width(), self.bounds.height());
        match self.shape {
            EmitterShape::Point => w.max(h) * 0.5,
            EmitterShape::Line { end } => (w - end[0].abs()).max(h - end[1].abs()) * 0.5,
        }
    }

    /// World position of the far end of the emitter (the origin for points).
    pub fn segment_end(&self) -> [f32; 3] {
        match self.shape {
            EmitterShape::Point => self.origin,
            EmitterShape::Line { end } => [self.origin[0] + end[0], self.origin[1] + end[1], self.origin[2]],
        }
    }

    /// Move the emitter, carrying its culling bounds along.
    pub fn translate_to(&mut self, origin: [f32; 3]) {
        let dx = origin[0] - self.origin[0];
        let dy = origin[1] - self.origin[1];
        self.bounds.min = [self.bounds.min[0] + dx, self.bounds.min[1] + dy];
        self.bounds.max = [self.bounds.max[0] + dx, self.bounds.max[1] + dy];
        self.origin = origin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_bounds_cover_the_segment() {
        let line = LightEmitter::line(EmitterId(1), [1.0, 2.0, 0.5], [-3.0, 1.0], [1.0; 4], 0.5);
        assert_eq!(line.bounds, Rect::new([-2.5, 1.5], [1.5, 3.5]));
        assert_eq!(line.segment_end(), [-2.0, 3.0, 0.5]);
        assert_eq!(line.reach(), 0.5);
        assert_eq!(LightEmitter::point(EmitterId(2), [0.0; 3], [1.0; 4], 3.0).reach(), 3.0);
    }
}
