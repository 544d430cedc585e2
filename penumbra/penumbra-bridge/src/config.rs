//! Bridge configuration: target formats, tone mapping, swapchain.

use render_api::PixelFormat;

/// Tone mapping applied when presenting an HDR target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

impl ToneMapping {
    /// Value of the present shader's `tone_mode` uniform.
    pub fn mode(self) -> u32 {
        match self {
            ToneMapping::Reinhard => 0,
            ToneMapping::None => 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub tone_mapping: ToneMapping,
    /// Swapchain texture format for present (e.g. Rgba8Unorm or Bgra8Unorm).
    pub swapchain_format: wgpu::TextureFormat,
    /// Format of the screen target the window backend renders into.
    pub screen_format: PixelFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tone_mapping: ToneMapping::default(),
            swapchain_format: wgpu::TextureFormat::Rgba8Unorm,
            screen_format: PixelFormat::Standard,
        }
    }
}

/// GPU format backing a target of `format`.
pub fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Standard => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Hdr => wgpu::TextureFormat::Rgba16Float,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdr_targets_are_half_float() {
        assert_eq!(texture_format(PixelFormat::Standard), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(texture_format(PixelFormat::Hdr), wgpu::TextureFormat::Rgba16Float);
        assert_eq!(ToneMapping::default().mode(), 0);
        assert_eq!(ToneMapping::None.mode(), 1);
    }
}
