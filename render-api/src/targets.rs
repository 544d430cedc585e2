//! Offscreen render targets as seen through the collaborator contract.

/// Opaque handle of a backend-owned render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Pixel storage of a target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8 bits per channel, values clamp to `[0, 1]`.
    #[default]
    Standard,
    /// 16-bit float per channel for values above 1.
    Hdr,
}

/// Sampling filter used when a target is read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Bilinear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub filter: FilterMode,
}

/// What a render call does to its target before drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearMode {
    Color([f32; 4]),
    /// Draw on top of the existing contents.
    Keep,
}

impl ClearMode {
    pub const TRANSPARENT: ClearMode = ClearMode::Color([0.0, 0.0, 0.0, 0.0]);
}
