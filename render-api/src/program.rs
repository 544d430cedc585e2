//! Named shading programs the compositor asks a backend to run.
//!
//! The pixel math is owned by the backend; this module fixes what each
//! program reads (through [`crate::ParameterBlock`]) and how its output is
//! blended into the destination.

use crate::params::ParamName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadingProgram {
    /// Override: writes a fully blocking obstacle value scaled by object alpha.
    ObstacleOpacity,
    /// Blit: 2x2 box filter from the obstacle upsample buffer.
    ObstacleDownsample,
    /// Override: writes the object's normal encoded as `n * 0.5 + 0.5`.
    NormalBuffer,
    /// Override on emitter geometry: per-pixel `N.L` toward the emitter.
    /// Reads `NormalTexture`, `LightOrigin`, `LightSegmentEnd`.
    NormalMappedLight,
    /// Blit, additive: `EmitterColorTexture * source.r`.
    LightBlend,
    /// Blit: horizontal blur tap at `BlurStep` texels.
    BlurHorizontal,
    /// Blit: vertical blur tap at `BlurStep` texels.
    BlurVertical,
    /// Blit from the emission buffer: `mix(emission, previous(uv + shift), persistence)`
    /// attenuated by the obstacle buffer. Reads `PreviousAmbient` (optional),
    /// `ObstacleTexture`, `AmbientShift`, `AmbientPersistence`.
    AmbientIntegrate,
    /// Blit from the scene: `scene * (light + ambient)`. Reads
    /// `LightSourceTexture`, `AmbientTexture` (optional), `CompositeUvScale`,
    /// `CompositeUvOffset`, `ExtendedToSmallScale`.
    Composite,
    /// Blit, alpha blended over the destination.
    AlphaOver,
}

/// How a program's output combines with the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Replace,
    Additive,
    AlphaOver,
}

impl ShadingProgram {
    pub const ALL: [ShadingProgram; 10] = [
        ShadingProgram::ObstacleOpacity,
        ShadingProgram::ObstacleDownsample,
        ShadingProgram::NormalBuffer,
        ShadingProgram::NormalMappedLight,
        ShadingProgram::LightBlend,
        ShadingProgram::BlurHorizontal,
        ShadingProgram::BlurVertical,
        ShadingProgram::AmbientIntegrate,
        ShadingProgram::Composite,
        ShadingProgram::AlphaOver,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShadingProgram::ObstacleOpacity => "obstacle_opacity",
            ShadingProgram::ObstacleDownsample => "obstacle_downsample",
            ShadingProgram::NormalBuffer => "normal_buffer",
            ShadingProgram::NormalMappedLight => "normal_mapped_light",
            ShadingProgram::LightBlend => "light_blend",
            ShadingProgram::BlurHorizontal => "blur_horizontal",
            ShadingProgram::BlurVertical => "blur_vertical",
            ShadingProgram::AmbientIntegrate => "ambient_integrate",
            ShadingProgram::Composite => "composite",
            ShadingProgram::AlphaOver => "alpha_over",
        }
    }

    pub fn blend(self) -> BlendMode {
        match self {
            ShadingProgram::LightBlend => BlendMode::Additive,
            ShadingProgram::AlphaOver | ShadingProgram::ObstacleOpacity => BlendMode::AlphaOver,
            _ => BlendMode::Replace,
        }
    }

    /// True for programs used with `blit`, false for draw overrides.
    pub fn is_fullscreen(self) -> bool {
        !matches!(
            self,
            ShadingProgram::ObstacleOpacity | ShadingProgram::NormalBuffer | ShadingProgram::NormalMappedLight
        )
    }

    /// Texture parameters a fullscreen program samples besides its source,
    /// in binding order.
    pub fn texture_inputs(self) -> &'static [ParamName] {
        match self {
            ShadingProgram::LightBlend => &[ParamName::EmitterColorTexture],
            ShadingProgram::AmbientIntegrate => &[ParamName::PreviousAmbient, ParamName::ObstacleTexture],
            ShadingProgram::Composite => &[ParamName::LightSourceTexture, ParamName::AmbientTexture],
            ShadingProgram::NormalMappedLight => &[ParamName::NormalTexture],
            _ => &[],
        }
    }
}
