//! Per-viewer block of named shading parameters.
//!
//! Each compositor owns one block and passes it into every draw and blit, so
//! two viewers never observe each other's values.

use std::collections::HashMap;

use crate::targets::TargetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamName {
    /// Extended-resolution obstacle buffer.
    ObstacleTexture,
    /// Light texels per world unit.
    PixelDensity,
    /// Small buffer extent divided by extended buffer extent, per axis.
    ExtendedToSmallScale,
    /// Light viewer snapping residual in small-buffer uv.
    TexelPositionOffset,
    HdrEnabled,
    PerspectiveEnabled,
    /// Blur tap distance in texels for the current iteration.
    BlurStep,
    /// Normal buffer written by the normal pass.
    NormalTexture,
    /// Emitter origin in world space (`xyz`, `w` unused).
    LightOrigin,
    /// World space end of a line emitter; equals the origin for points.
    LightSegmentEnd,
    /// Single-emitter colour scratch buffer.
    EmitterColorTexture,
    PreviousAmbient,
    /// Viewer movement since the previous ambient step, in buffer uv (x right, y up).
    AmbientShift,
    AmbientPersistence,
    LightSourceTexture,
    AmbientTexture,
    /// Screen extent divided by small buffer extent, per axis.
    CompositeUvScale,
    CompositeUvOffset,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Flag(bool),
    Texture(TargetId),
}

#[derive(Clone, Debug, Default)]
pub struct ParameterBlock {
    values: HashMap<ParamName, ParamValue>,
}

impl ParameterBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: ParamName, value: ParamValue) {
        self.values.insert(name, value);
    }

    pub fn set_float(&mut self, name: ParamName, value: f32) {
        self.set(name, ParamValue::Float(value));
    }

    pub fn set_vec2(&mut self, name: ParamName, value: [f32; 2]) {
        self.set(name, ParamValue::Vec2(value));
    }

    pub fn set_vec4(&mut self, name: ParamName, value: [f32; 4]) {
        self.set(name, ParamValue::Vec4(value));
    }

    pub fn set_flag(&mut self, name: ParamName, value: bool) {
        self.set(name, ParamValue::Flag(value));
    }

    /// Bind a texture, or unbind it with `None`.
    pub fn set_texture(&mut self, name: ParamName, target: Option<TargetId>) {
        match target {
            Some(t) => self.set(name, ParamValue::Texture(t)),
            None => self.remove(name),
        }
    }

    pub fn remove(&mut self, name: ParamName) {
        self.values.remove(&name);
    }

    pub fn get(&self, name: ParamName) -> Option<ParamValue> {
        self.values.get(&name).copied()
    }

    pub fn float(&self, name: ParamName) -> Option<f32> {
        match self.get(name)? {
            ParamValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec2(&self, name: ParamName) -> Option<[f32; 2]> {
        match self.get(name)? {
            ParamValue::Vec2(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec4(&self, name: ParamName) -> Option<[f32; 4]> {
        match self.get(name)? {
            ParamValue::Vec4(v) => Some(v),
            _ => None,
        }
    }

    pub fn flag(&self, name: ParamName) -> bool {
        matches!(self.get(name), Some(ParamValue::Flag(true)))
    }

    pub fn texture(&self, name: ParamName) -> Option<TargetId> {
        match self.get(name)? {
            ParamValue::Texture(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_reject_other_kinds() {
        let mut params = ParameterBlock::new();
        params.set_float(ParamName::PixelDensity, 20.0);
        params.set_texture(ParamName::ObstacleTexture, Some(TargetId(3)));
        assert_eq!(params.float(ParamName::PixelDensity), Some(20.0));
        assert_eq!(params.vec2(ParamName::PixelDensity), None);
        assert_eq!(params.texture(ParamName::ObstacleTexture), Some(TargetId(3)));
        params.set_texture(ParamName::ObstacleTexture, None);
        assert_eq!(params.texture(ParamName::ObstacleTexture), None);
        assert!(!params.flag(ParamName::HdrEnabled));
    }
}
