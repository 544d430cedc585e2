//! Penumbra configuration: light buffer resolution, quality modes, blur and ambient tuning.

use render_api::{FilterMode, PixelFormat};

/// Compositor configuration. Read at setup and whenever [`crate::LightingCompositor::set_config`] is called.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Light texels per world unit (`1 / world units per texel`).
    pub light_pixel_density: f32,
    /// World units the extended buffers reach past the visible frame on every side.
    pub extended_margin: f32,
    /// Store light buffers in 16-bit float instead of 8-bit unorm.
    pub hdr_enabled: bool,
    /// Render obstacles at 2x and downsample.
    pub obstacle_antialiasing: bool,
    pub ambient_enabled: bool,
    pub ambient_blur_enabled: bool,
    pub light_source_blur_enabled: bool,
    /// Blur tap distance of the first iteration, in texels.
    pub blur_radius: f32,
    pub blur_iterations: u32,
    /// Resolution divisor the blur radius is expressed against.
    pub blur_downsample: u32,
    /// Fraction of the previous ambient field kept per integration step.
    pub ambient_persistence: f32,
    /// Filter used when light buffers are sampled.
    pub filter_mode: FilterMode,
    /// Per-emitter normal-mapped lighting. Orthographic viewers only.
    pub normal_mapping_enabled: bool,
    /// Keep lighting off content drawn by earlier viewers into the same frame.
    pub isolate_to_this_viewer: bool,
    /// False for preview rendering (e.g. an editor) where frames are sparse.
    pub interactive_runtime: bool,
    /// Ambient integration steps per frame when not running interactively.
    pub preview_ambient_cycles: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            light_pixel_density: 16.0,
            extended_margin: 2.0,
            hdr_enabled: false,
            obstacle_antialiasing: false,
            ambient_enabled: true,
            ambient_blur_enabled: true,
            light_source_blur_enabled: true,
            blur_radius: 1.0,
            blur_iterations: 2,
            blur_downsample: 1,
            ambient_persistence: 0.9,
            filter_mode: FilterMode::Bilinear,
            normal_mapping_enabled: false,
            isolate_to_this_viewer: false,
            interactive_runtime: true,
            preview_ambient_cycles: 8,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("light pixel density must be finite and > 0 (got {0})")]
    Density(f32),

    #[error("extended margin must be finite and >= 0 (got {0})")]
    Margin(f32),

    #[error("blur radius must be finite and >= 0 (got {0})")]
    BlurRadius(f32),

    #[error("blur downsample must be >= 1")]
    BlurDownsample,

    #[error("ambient persistence must be in [0, 1) (got {0})")]
    Persistence(f32),
}

/// Config fields that decide buffer sizes, formats and which buffers exist.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct BufferLayoutKey {
    density: f32,
    margin: f32,
    hdr: bool,
    antialiasing: bool,
    filter: FilterMode,
    normal_mapping: bool,
    ambient: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.light_pixel_density.is_finite() || self.light_pixel_density <= 0.0 {
            return Err(ConfigError::Density(self.light_pixel_density));
        }
        if !self.extended_margin.is_finite() || self.extended_margin < 0.0 {
            return Err(ConfigError::Margin(self.extended_margin));
        }
        if !self.blur_radius.is_finite() || self.blur_radius < 0.0 {
            return Err(ConfigError::BlurRadius(self.blur_radius));
        }
        if self.blur_downsample == 0 {
            return Err(ConfigError::BlurDownsample);
        }
        if !(0.0..1.0).contains(&self.ambient_persistence) {
            return Err(ConfigError::Persistence(self.ambient_persistence));
        }
        Ok(())
    }

    pub fn pixel_format(&self) -> PixelFormat {
        if self.hdr_enabled {
            PixelFormat::Hdr
        } else {
            PixelFormat::Standard
        }
    }

    /// Integration steps the ambient integrator runs per frame before extra cycles.
    pub fn ambient_cycles_per_frame(&self) -> u32 {
        if self.interactive_runtime {
            1
        } else {
            self.preview_ambient_cycles.max(1)
        }
    }

    pub(crate) fn layout_key(&self) -> BufferLayoutKey {
        BufferLayoutKey {
            density: self.light_pixel_density,
            margin: self.extended_margin,
            hdr: self.hdr_enabled,
            antialiasing: self.obstacle_antialiasing,
            filter: self.filter_mode,
            normal_mapping: self.normal_mapping_enabled,
            ambient: self.ambient_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = PipelineConfig { light_pixel_density: 0.0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Density(0.0)));
        let cfg = PipelineConfig { ambient_persistence: 1.0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Persistence(1.0)));
        let cfg = PipelineConfig { blur_downsample: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::BlurDownsample));
    }

    #[test]
    fn preview_runtime_runs_more_ambient_cycles() {
        let cfg = PipelineConfig { interactive_runtime: false, preview_ambient_cycles: 5, ..Default::default() };
        assert_eq!(cfg.ambient_cycles_per_frame(), 5);
        assert_eq!(PipelineConfig::default().ambient_cycles_per_frame(), 1);
    }
}
