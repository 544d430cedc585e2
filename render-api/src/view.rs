//! View and projection math shared by the compositor and every backend.
//!
//! World space: the lit plane is `z = 0`, `+X` right, `+Y` up. Viewers look
//! along `+Z`. Matrices are column-major (`m[col * 4 + row]`, WGSL/wgpu
//! convention) and map depth into `[0, 1]`. Texture uv has `v` pointing down.

/// Camera projection of a viewer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// `half_height` is the orthographic size: half the visible world height.
    Orthographic { half_height: f32, aspect: f32 },
    /// `fov_y` is the full vertical field of view in radians.
    Perspective { fov_y: f32, aspect: f32 },
}

impl Projection {
    pub fn aspect(&self) -> f32 {
        match *self {
            Projection::Orthographic { aspect, .. } | Projection::Perspective { aspect, .. } => aspect,
        }
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self, Projection::Perspective { .. })
    }

    /// Half of the visible world extent `(w, h)` on a plane `plane_distance` away.
    /// Orthographic projections ignore the distance.
    pub fn half_extent_at(&self, plane_distance: f32) -> [f32; 2] {
        match *self {
            Projection::Orthographic { half_height, aspect } => [half_height * aspect, half_height],
            Projection::Perspective { fov_y, aspect } => {
                let half_h = (fov_y * 0.5).tan() * plane_distance;
                [half_h * aspect, half_h]
            }
        }
    }

    /// Projection matrix. Orthographic depth covers `[-far, far]` around the
    /// viewer so flat 2D content is never clipped by `near`.
    pub fn matrix(&self, near: f32, far: f32) -> [f32; 16] {
        match *self {
            Projection::Orthographic { half_height, aspect } => {
                let sx = 1.0 / (half_height * aspect);
                let sy = 1.0 / half_height;
                let sz = -0.5 / far;
                [
                    sx, 0.0, 0.0, 0.0,
                    0.0, sy, 0.0, 0.0,
                    0.0, 0.0, sz, 0.0,
                    0.0, 0.0, 0.5, 1.0,
                ]
            }
            Projection::Perspective { fov_y, aspect } => {
                let t = (fov_y / 2.0).tan();
                let sy = 1.0 / t;
                let sx = sy / aspect;
                let a = far / (near - far);
                let b = (near * far) / (near - far);
                [
                    sx, 0.0, 0.0, 0.0,
                    0.0, sy, 0.0, 0.0,
                    0.0, 0.0, a, -1.0,
                    0.0, 0.0, b, 0.0,
                ]
            }
        }
    }
}

/// Axis-aligned rectangle on the lit plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Rect {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: [f32; 2], half_extent: [f32; 2]) -> Self {
        Self {
            min: [center[0] - half_extent[0], center[1] - half_extent[1]],
            max: [center[0] + half_extent[0], center[1] + half_extent[1]],
        }
    }

    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
    }

    pub fn contains(&self, p: [f32; 2]) -> bool {
        p[0] >= self.min[0] && p[0] <= self.max[0] && p[1] >= self.min[1] && p[1] <= self.max[1]
    }
}

/// A viewpoint plus projection: what `render_from` renders from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewSetup {
    pub position: [f32; 3],
    pub projection: Projection,
    /// Distance from the viewer to the lit plane; only perspective uses it.
    pub plane_distance: f32,
    pub near: f32,
    pub far: f32,
}

impl ViewSetup {
    pub fn new(position: [f32; 3], projection: Projection, plane_distance: f32) -> Self {
        Self {
            position,
            projection,
            plane_distance,
            near: 0.01,
            far: 1000.0,
        }
    }

    pub fn view_matrix(&self) -> [f32; 16] {
        let [px, py, pz] = self.position;
        [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, -1.0, 0.0,
            -px, -py, pz, 1.0,
        ]
    }

    pub fn view_proj(&self) -> [f32; 16] {
        mat4_mul(&self.projection.matrix(self.near, self.far), &self.view_matrix())
    }

    /// World rectangle of the lit plane covered by this view.
    pub fn visible_rect(&self) -> Rect {
        Rect::from_center(
            [self.position[0], self.position[1]],
            self.projection.half_extent_at(self.plane_distance),
        )
    }

    /// Map a point on the lit plane to this view's texture uv.
    pub fn world_to_uv(&self, p: [f32; 2]) -> [f32; 2] {
        let [hw, hh] = self.projection.half_extent_at(self.plane_distance);
        [
            (p[0] - self.position[0]) / (2.0 * hw) + 0.5,
            0.5 - (p[1] - self.position[1]) / (2.0 * hh),
        ]
    }

    /// Inverse of [`ViewSetup::world_to_uv`].
    pub fn uv_to_world(&self, uv: [f32; 2]) -> [f32; 2] {
        let [hw, hh] = self.projection.half_extent_at(self.plane_distance);
        [
            self.position[0] + (uv[0] - 0.5) * 2.0 * hw,
            self.position[1] + (0.5 - uv[1]) * 2.0 * hh,
        ]
    }
}

/// Multiply two 4x4 column-major matrices: C = A * B.
pub fn mat4_mul(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut c = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            c[col * 4 + row] = a[row] * b[col * 4]
                + a[4 + row] * b[col * 4 + 1]
                + a[8 + row] * b[col * 4 + 2]
                + a[12 + row] * b[col * 4 + 3];
        }
    }
    c
}

/// `m * (p, 1)` for a column-major matrix.
pub fn transform_point(m: &[f32; 16], p: [f32; 3]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = m[row] * p[0] + m[4 + row] * p[1] + m[8 + row] * p[2] + m[12 + row];
    }
    out
}

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

/// Column-major translation matrix.
pub fn translation(t: [f32; 3]) -> [f32; 16] {
    let mut m = IDENTITY;
    m[12] = t[0];
    m[13] = t[1];
    m[14] = t[2];
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ndc(view: &ViewSetup, p: [f32; 3]) -> [f32; 3] {
        let clip = transform_point(&view.view_proj(), p);
        [clip[0] / clip[3], clip[1] / clip[3], clip[2] / clip[3]]
    }

    #[test]
    fn orthographic_maps_visible_rect_to_ndc_edges() {
        let view = ViewSetup::new(
            [2.0, 1.0, -10.0],
            Projection::Orthographic { half_height: 5.0, aspect: 2.0 },
            10.0,
        );
        let corner = ndc(&view, [12.0, 6.0, 0.0]);
        assert!((corner[0] - 1.0).abs() < 1e-5);
        assert!((corner[1] - 1.0).abs() < 1e-5);
        assert!(corner[2] > 0.0 && corner[2] < 1.0);
        let rect = view.visible_rect();
        assert_eq!(rect.min, [-8.0, -4.0]);
        assert_eq!(rect.max, [12.0, 6.0]);
    }

    #[test]
    fn perspective_matches_plane_extent() {
        let fov = 60f32.to_radians();
        let view = ViewSetup::new([0.0, 0.0, -10.0], Projection::Perspective { fov_y: fov, aspect: 1.5 }, 10.0);
        let [hw, hh] = view.projection.half_extent_at(10.0);
        let edge = ndc(&view, [hw, hh, 0.0]);
        assert!((edge[0] - 1.0).abs() < 1e-4);
        assert!((edge[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn uv_round_trip_and_orientation() {
        let view = ViewSetup::new([0.0, 0.0, -10.0], Projection::Orthographic { half_height: 4.0, aspect: 1.0 }, 10.0);
        assert_eq!(view.world_to_uv([-4.0, 4.0]), [0.0, 0.0]);
        let w = view.uv_to_world([0.25, 0.75]);
        let uv = view.world_to_uv(w);
        assert!((uv[0] - 0.25).abs() < 1e-6 && (uv[1] - 0.75).abs() < 1e-6);
    }
}
