//! Resolution planner: light buffer sizes from the viewer projection and light pixel density.

use render_api::Projection;

pub const MIN_LIGHT_BUFFER_SIZE: u32 = 4;
pub const MAX_LIGHT_BUFFER_SIZE: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferSize {
    pub width: u32,
    pub height: u32,
}

impl BufferSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, factor: u32) -> Self {
        Self { width: self.width * factor, height: self.height * factor }
    }
}

/// Planned light buffers for one viewer configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightResolutions {
    /// Tight to the visible frame.
    pub small: BufferSize,
    /// Padded by the extension margin on every side.
    pub extended: BufferSize,
    /// Light viewer projection for the small buffers; one texel is exactly `texel_size`.
    pub small_projection: Projection,
    pub extended_projection: Projection,
    /// World extent covered by the small buffers.
    pub small_extent: [f32; 2],
    pub extended_extent: [f32; 2],
    /// World units per light texel on the lit plane.
    pub texel_size: f32,
}

impl LightResolutions {
    pub fn extended_to_small_scale(&self) -> [f32; 2] {
        [
            self.small_extent[0] / self.extended_extent[0],
            self.small_extent[1] / self.extended_extent[1],
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("light buffers would be {width}x{height}, below the {MIN_LIGHT_BUFFER_SIZE} texel minimum; light pixel density is too coarse")]
    DensityTooCoarse { width: u32, height: u32 },

    #[error("light buffers would be {width}x{height}, above the {MAX_LIGHT_BUFFER_SIZE} texel maximum; light pixel density is too fine")]
    DensityTooFine { width: u32, height: u32 },

    #[error("invalid viewer projection: {0}")]
    InvalidProjection(&'static str),
}

/// Round a texel count up to the next even integer.
///
/// Counts past twice the maximum (including infinite and NaN ones) saturate
/// there, so the caller still sees them as too fine.
pub fn round_up_even(texels: f32) -> u32 {
    let ceiling = 2 * MAX_LIGHT_BUFFER_SIZE;
    if !(texels < ceiling as f32) {
        return ceiling;
    }
    // Absorb float error so an exact 320.00003 stays 320.
    let n = (texels - 1e-3).ceil().max(0.0) as u32;
    n + (n & 1)
}

/// Snap a world position onto the light texel grid.
pub fn snap_to_texel(position: [f32; 3], density: f32) -> [f32; 3] {
    [
        (position[0] * density).round() / density,
        (position[1] * density).round() / density,
        position[2],
    ]
}

fn validate(projection: &Projection, plane_distance: f32) -> Result<(), PlanError> {
    let aspect = projection.aspect();
    if !aspect.is_finite() || aspect <= 0.0 {
        return Err(PlanError::InvalidProjection("aspect must be > 0"));
    }
    match *projection {
        Projection::Orthographic { half_height, .. } => {
            if !half_height.is_finite() || half_height <= 0.0 {
                return Err(PlanError::InvalidProjection("orthographic size must be > 0"));
            }
        }
        Projection::Perspective { fov_y, .. } => {
            if !(fov_y > 0.0 && fov_y < std::f32::consts::PI) {
                return Err(PlanError::InvalidProjection("field of view must be in (0, pi)"));
            }
            if !plane_distance.is_finite() || plane_distance <= 0.0 {
                return Err(PlanError::InvalidProjection("plane distance must be > 0"));
            }
        }
    }
    Ok(())
}

fn projection_for(projection: &Projection, extent: [f32; 2], plane_distance: f32) -> Projection {
    let aspect = extent[0] / extent[1];
    match projection {
        Projection::Orthographic { .. } => Projection::Orthographic { half_height: extent[1] * 0.5, aspect },
        Projection::Perspective { .. } => Projection::Perspective {
            fov_y: 2.0 * (extent[1] * 0.5 / plane_distance).atan(),
            aspect,
        },
    }
}

/// Plan the small and extended light buffers.
///
/// `plane_distance` is only used by perspective projections. Fails when any
/// dimension leaves `[MIN_LIGHT_BUFFER_SIZE, MAX_LIGHT_BUFFER_SIZE]`.
pub fn plan(
    projection: &Projection,
    plane_distance: f32,
    density: f32,
    margin: f32,
) -> Result<LightResolutions, PlanError> {
    validate(projection, plane_distance)?;
    let [half_w, half_h] = projection.half_extent_at(plane_distance);
    let small = BufferSize::new(round_up_even(2.0 * half_w * density), round_up_even(2.0 * half_h * density));
    let extended = BufferSize::new(
        round_up_even(2.0 * (half_w + margin) * density),
        round_up_even(2.0 * (half_h + margin) * density),
    );
    let smallest = small.width.min(small.height).min(extended.width).min(extended.height);
    if smallest < MIN_LIGHT_BUFFER_SIZE {
        return Err(PlanError::DensityTooCoarse { width: small.width, height: small.height });
    }
    let largest = small.width.max(small.height).max(extended.width).max(extended.height);
    if largest > MAX_LIGHT_BUFFER_SIZE {
        return Err(PlanError::DensityTooFine { width: extended.width, height: extended.height });
    }
    let small_extent = [small.width as f32 / density, small.height as f32 / density];
    let extended_extent = [extended.width as f32 / density, extended.height as f32 / density];
    Ok(LightResolutions {
        small,
        extended,
        small_projection: projection_for(projection, small_extent, plane_distance),
        extended_projection: projection_for(projection, extended_extent, plane_distance),
        small_extent,
        extended_extent,
        texel_size: 1.0 / density,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ortho(half_height: f32, aspect: f32) -> Projection {
        Projection::Orthographic { half_height, aspect }
    }

    #[test]
    fn extended_height_for_size_five_margin_three() {
        let res = plan(&ortho(5.0, 1.0), 0.0, 20.0, 3.0).unwrap();
        assert_eq!(res.extended.height, 320);
        assert_eq!(res.small.height, 200);
        assert!((res.texel_size - 0.05).abs() < 1e-6);
    }

    #[test]
    fn dimensions_are_even_and_extended_covers_small() {
        for &density in &[3.3f32, 7.0, 10.5, 16.0, 20.0] {
            for &aspect in &[0.5f32, 1.0, 1.333, 1.777, 2.4] {
                for &margin in &[0.0f32, 0.7, 2.0] {
                    let Ok(res) = plan(&ortho(5.0, aspect), 0.0, density, margin) else { continue };
                    for size in [res.small, res.extended] {
                        assert_eq!(size.width % 2, 0);
                        assert_eq!(size.height % 2, 0);
                    }
                    assert!(res.extended.width >= res.small.width);
                    assert!(res.extended.height >= res.small.height);
                }
            }
        }
    }

    #[test]
    fn rounds_up_to_even() {
        assert_eq!(round_up_even(7.2), 8);
        assert_eq!(round_up_even(8.0), 8);
        assert_eq!(round_up_even(8.5), 10);
        assert_eq!(round_up_even(320.00003), 320);
    }

    #[test]
    fn huge_texel_counts_saturate_even() {
        assert_eq!(round_up_even(1e12), 2 * MAX_LIGHT_BUFFER_SIZE);
        assert_eq!(round_up_even(f32::INFINITY), 2 * MAX_LIGHT_BUFFER_SIZE);
        assert_eq!(round_up_even(f32::NAN), 2 * MAX_LIGHT_BUFFER_SIZE);
    }

    #[test]
    fn extreme_densities_are_too_fine_not_a_crash() {
        assert!(matches!(plan(&ortho(5.0, 1.0), 0.0, 1e10, 0.0), Err(PlanError::DensityTooFine { .. })));
        // half_height * aspect overflows to infinity.
        assert!(matches!(plan(&ortho(f32::MAX, 4.0), 0.0, 1.0, 0.0), Err(PlanError::DensityTooFine { .. })));
        assert!(matches!(plan(&ortho(5.0, 1.0), 0.0, 10.0, f32::MAX), Err(PlanError::DensityTooFine { .. })));
    }

    #[test]
    fn out_of_range_densities_fail() {
        assert!(matches!(plan(&ortho(1.0, 1.0), 0.0, 1.0, 0.0), Err(PlanError::DensityTooCoarse { .. })));
        assert!(matches!(plan(&ortho(50.0, 1.0), 0.0, 20.0, 0.0), Err(PlanError::DensityTooFine { .. })));
        assert!(matches!(plan(&ortho(0.0, 1.0), 0.0, 20.0, 0.0), Err(PlanError::InvalidProjection(_))));
    }

    #[test]
    fn perspective_uses_plane_distance() {
        let fov = 2.0 * (0.5f32).atan();
        let persp = Projection::Perspective { fov_y: fov, aspect: 1.0 };
        let res = plan(&persp, 10.0, 10.0, 1.0).unwrap();
        assert_eq!(res.small, BufferSize::new(100, 100));
        assert_eq!(res.extended, BufferSize::new(120, 120));
        assert!(matches!(res.extended_projection, Projection::Perspective { .. }));
    }

    #[test]
    fn light_projection_matches_texel_grid() {
        let res = plan(&ortho(5.0, 1.5), 0.0, 10.0, 1.0).unwrap();
        let [w, h] = res.small_projection.half_extent_at(0.0);
        assert!((2.0 * w / res.small.width as f32 - res.texel_size).abs() < 1e-5);
        assert!((2.0 * h / res.small.height as f32 - res.texel_size).abs() < 1e-5);
        let scale = res.extended_to_small_scale();
        assert!(scale[0] < 1.0 && scale[1] < 1.0);
    }

    #[test]
    fn snapping_lands_on_texel_centres() {
        let snapped = snap_to_texel([1.23, -0.07, -10.0], 10.0);
        assert!((snapped[0] - 1.2).abs() < 1e-6);
        assert!((snapped[1] + 0.1).abs() < 1e-6);
        assert_eq!(snapped[2], -10.0);
    }
}
