//! Pixel math of the software backend: object materials, draw overrides and
//! fullscreen programs.

use std::collections::HashMap;

use render_api::{
    BackendError, BlendMode, ExtractedObject, ParamName, ParameterBlock, ShadingProgram, TargetId, ViewSetup,
};

use super::image::Image;

/// Samples marched from a light fragment toward its emitter.
pub const OBSTACLE_SAMPLES: u32 = 16;
/// Fraction of light an opaque obstacle sample removes.
pub const OBSTACLE_ABSORPTION: f32 = 0.25;

/// Bound textures and parameters visible to one draw or blit.
pub(crate) struct Inputs<'a> {
    pub targets: &'a HashMap<TargetId, Image>,
    pub params: &'a ParameterBlock,
}

impl Inputs<'_> {
    fn texture(&self, name: ParamName) -> Option<&Image> {
        self.params.texture(name).and_then(|t| self.targets.get(&t))
    }

    fn vec2_or(&self, name: ParamName, fallback: [f32; 2]) -> [f32; 2] {
        self.params.vec2(name).unwrap_or(fallback)
    }
}

fn remap(uv: [f32; 2], scale: [f32; 2], offset: [f32; 2]) -> [f32; 2] {
    [
        (uv[0] - 0.5) * scale[0] + 0.5 + offset[0],
        (uv[1] - 0.5) * scale[1] + 0.5 + offset[1],
    ]
}

// Per-channel survival of light through one obstacle texel; tinted obstacles pass their own colour.
fn attenuation(obstacle: [f32; 4], absorption: f32) -> [f32; 3] {
    let a = obstacle[3].clamp(0.0, 1.0) * absorption;
    [
        1.0 - a * (1.0 - obstacle[0].clamp(0.0, 1.0)),
        1.0 - a * (1.0 - obstacle[1].clamp(0.0, 1.0)),
        1.0 - a * (1.0 - obstacle[2].clamp(0.0, 1.0)),
    ]
}

/// Light surviving from `light_uv` to `uv` (both small-buffer uv).
fn transmittance(uv: [f32; 2], light_uv: [f32; 2], inputs: &Inputs<'_>) -> [f32; 3] {
    let Some(obstacles) = inputs.texture(ParamName::ObstacleTexture) else {
        return [1.0; 3];
    };
    let scale = inputs.vec2_or(ParamName::ExtendedToSmallScale, [1.0, 1.0]);
    let mut t = [1.0f32; 3];
    for i in 0..OBSTACLE_SAMPLES {
        let s = (i as f32 + 0.5) / OBSTACLE_SAMPLES as f32;
        let p = [uv[0] + (light_uv[0] - uv[0]) * s, uv[1] + (light_uv[1] - uv[1]) * s];
        let a = attenuation(obstacles.sample(remap(p, scale, [0.0, 0.0])), OBSTACLE_ABSORPTION);
        for c in 0..3 {
            t[c] *= a[c];
        }
    }
    t
}

fn closest_on_segment(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> [f32; 2] {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let len2 = ab[0] * ab[0] + ab[1] * ab[1];
    if len2 <= f32::EPSILON {
        return a;
    }
    let t = (((p[0] - a[0]) * ab[0] + (p[1] - a[1]) * ab[1]) / len2).clamp(0.0, 1.0);
    [a[0] + ab[0] * t, a[1] + ab[1] * t]
}

fn normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    (len > 1e-6).then(|| [v[0] / len, v[1] / len, v[2] / len])
}

/// Shade one fragment of a drawn object. `uv` is the fragment's position in
/// the target, `object_uv` the interpolated mesh uv. `None` discards.
pub(crate) fn shade_fragment(
    object: &ExtractedObject,
    program: Option<ShadingProgram>,
    view: &ViewSetup,
    uv: [f32; 2],
    object_uv: [f32; 2],
    inputs: &Inputs<'_>,
) -> Result<Option<([f32; 4], BlendMode)>, BackendError> {
    let c = object.color;
    match program {
        None if object.emitter.is_some() => {
            // Light geometry uv is the offset from the origin in world units.
            let nearest = closest_on_segment([0.0, 0.0], object.light_segment, object_uv);
            let d = [object_uv[0] - nearest[0], object_uv[1] - nearest[1]];
            let falloff = if object.light_radius > 0.0 {
                (1.0 - (d[0] * d[0] + d[1] * d[1]).sqrt() / object.light_radius).clamp(0.0, 1.0)
            } else {
                0.0
            };
            if falloff <= 0.0 {
                return Ok(None);
            }
            let origin = object.origin();
            let t = transmittance(uv, view.world_to_uv([origin[0] + nearest[0], origin[1] + nearest[1]]), inputs);
            let k = c[3] * falloff;
            Ok(Some(([c[0] * k * t[0], c[1] * k * t[1], c[2] * k * t[2], k], BlendMode::Additive)))
        }
        None => Ok(Some((c, BlendMode::AlphaOver))),
        Some(ShadingProgram::ObstacleOpacity) => Ok(Some(([0.0, 0.0, 0.0, c[3]], BlendMode::AlphaOver))),
        Some(ShadingProgram::NormalBuffer) => {
            let n = normalize(object.normal).unwrap_or([0.0, 0.0, 1.0]);
            Ok(Some(([n[0] * 0.5 + 0.5, n[1] * 0.5 + 0.5, n[2] * 0.5 + 0.5, 1.0], BlendMode::Replace)))
        }
        Some(ShadingProgram::NormalMappedLight) => {
            let n = inputs
                .texture(ParamName::NormalTexture)
                .map(|img| {
                    let e = img.sample(uv);
                    [e[0] * 2.0 - 1.0, e[1] * 2.0 - 1.0, e[2] * 2.0 - 1.0]
                })
                .and_then(normalize)
                .unwrap_or([0.0, 0.0, 1.0]);
            let origin = inputs.params.vec4(ParamName::LightOrigin).unwrap_or({
                let o = object.origin();
                [o[0], o[1], o[2], 0.0]
            });
            let end = inputs.params.vec4(ParamName::LightSegmentEnd).unwrap_or(origin);
            let world = view.uv_to_world(uv);
            let nearest = closest_on_segment([origin[0], origin[1]], [end[0], end[1]], world);
            let to_light = [nearest[0] - world[0], nearest[1] - world[1], origin[2].max(0.0)];
            let ndl = normalize(to_light)
                .map(|l| (n[0] * l[0] + n[1] * l[1] + n[2] * l[2]).max(0.0))
                .unwrap_or(1.0);
            Ok(Some(([ndl, ndl, ndl, 1.0], BlendMode::Replace)))
        }
        Some(other) => Err(BackendError::Device(format!("`{}` is not a draw override", other.label()))),
    }
}

/// One output texel of a fullscreen program.
pub(crate) fn blit_texel(
    source: &Image,
    destination: (u32, u32, u32, u32),
    program: Option<ShadingProgram>,
    inputs: &Inputs<'_>,
) -> Result<[f32; 4], BackendError> {
    let (x, y, width, height) = destination;
    let uv = [(x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32];
    let step = inputs.params.float(ParamName::BlurStep).unwrap_or(1.0);
    let tap3 = |offset: [f32; 2]| {
        let a = source.sample([uv[0] - offset[0], uv[1] - offset[1]]);
        let b = source.sample(uv);
        let c = source.sample([uv[0] + offset[0], uv[1] + offset[1]]);
        [0, 1, 2, 3].map(|i| 0.25 * a[i] + 0.5 * b[i] + 0.25 * c[i])
    };
    let value = match program {
        None | Some(ShadingProgram::AlphaOver) => source.sample(uv),
        Some(ShadingProgram::ObstacleDownsample) => {
            let (sx, sy) = (2 * x as i64, 2 * y as i64);
            let texels = [source.get(sx, sy), source.get(sx + 1, sy), source.get(sx, sy + 1), source.get(sx + 1, sy + 1)];
            [0, 1, 2, 3].map(|i| texels.iter().map(|t| t[i]).sum::<f32>() * 0.25)
        }
        Some(ShadingProgram::BlurHorizontal) => tap3([step / source.width as f32, 0.0]),
        Some(ShadingProgram::BlurVertical) => tap3([0.0, step / source.height as f32]),
        Some(ShadingProgram::LightBlend) => {
            let color = inputs.texture(ParamName::EmitterColorTexture).map(|i| i.sample(uv)).unwrap_or([0.0; 4]);
            let shading = source.sample(uv)[0];
            color.map(|v| v * shading)
        }
        Some(ShadingProgram::AmbientIntegrate) => {
            let emission = source.sample(uv);
            let shift = inputs.vec2_or(ParamName::AmbientShift, [0.0, 0.0]);
            let previous = inputs
                .texture(ParamName::PreviousAmbient)
                .map(|p| p.sample_bordered([uv[0] + shift[0], uv[1] - shift[1]]))
                .unwrap_or([0.0; 4]);
            let keep = inputs.params.float(ParamName::AmbientPersistence).unwrap_or(0.9);
            let mixed = [0, 1, 2, 3].map(|i| emission[i] * (1.0 - keep) + previous[i] * keep);
            let a = inputs
                .texture(ParamName::ObstacleTexture)
                .map(|o| attenuation(o.sample(uv), 1.0))
                .unwrap_or([1.0; 3]);
            [mixed[0] * a[0], mixed[1] * a[1], mixed[2] * a[2], mixed[3]]
        }
        Some(ShadingProgram::Composite) => {
            let scene = source.sample(uv);
            let light_uv = remap(
                uv,
                inputs.vec2_or(ParamName::CompositeUvScale, [1.0, 1.0]),
                inputs.vec2_or(ParamName::CompositeUvOffset, [0.0, 0.0]),
            );
            let light = inputs
                .texture(ParamName::LightSourceTexture)
                .map(|l| l.sample_bordered(light_uv))
                .unwrap_or([0.0; 4]);
            let ambient = inputs
                .texture(ParamName::AmbientTexture)
                .map(|a| {
                    let scale = inputs.vec2_or(ParamName::ExtendedToSmallScale, [1.0, 1.0]);
                    a.sample_bordered(remap(light_uv, scale, [0.0, 0.0]))
                })
                .unwrap_or([0.0; 4]);
            [
                scene[0] * (light[0] + ambient[0]),
                scene[1] * (light[1] + ambient[1]),
                scene[2] * (light[2] + ambient[2]),
                scene[3],
            ]
        }
        Some(other) => return Err(BackendError::Device(format!("`{}` is not a fullscreen program", other.label()))),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_projection_clamps_to_ends() {
        assert_eq!(closest_on_segment([0.0, 0.0], [2.0, 0.0], [1.0, 5.0]), [1.0, 0.0]);
        assert_eq!(closest_on_segment([0.0, 0.0], [2.0, 0.0], [-3.0, 1.0]), [0.0, 0.0]);
        assert_eq!(closest_on_segment([1.0, 1.0], [1.0, 1.0], [9.0, 9.0]), [1.0, 1.0]);
    }

    #[test]
    fn tinted_obstacles_pass_their_colour() {
        let red_glass = attenuation([1.0, 0.0, 0.0, 1.0], 1.0);
        assert_eq!(red_glass, [1.0, 0.0, 0.0]);
        let clear = attenuation([0.0, 0.0, 0.0, 0.0], 1.0);
        assert_eq!(clear, [1.0; 3]);
    }
}
