//! Penumbra bridge: implements `render_api::LightingBackend` on wgpu, plus a
//! tone-mapped present pass and a window-capable wrapper.

mod backend;
mod config;
mod present;
mod programs;
mod window_backend;

pub use backend::{GpuTarget, WgpuLightingBackend};
pub use config::{BridgeConfig, ToneMapping};
pub use present::PresentPass;
pub use window_backend::PenumbraWindowBackend;
