//! Window-capable backend: a [`WgpuLightingBackend`] created from a window,
//! plus a screen target that is tone mapped onto the window each frame.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use render_api::{BackendError, FilterMode, LightingBackend, TargetDesc, TargetId};
use wgpu::SurfaceTargetUnsafe;

use crate::backend::WgpuLightingBackend;
use crate::config::{BridgeConfig, ToneMapping};
use crate::present::PresentPass;

/// Owns the wgpu instance and lighting backend; can present to a window.
/// The surface is recreated each frame from raw handles, so the host keeps the
/// window alive and passes its handles to [`PenumbraWindowBackend::present`].
pub struct PenumbraWindowBackend {
    instance: wgpu::Instance,
    backend: WgpuLightingBackend,
    present: PresentPass,
    config: BridgeConfig,
    screen: Option<(TargetId, u32, u32)>,
}

fn device_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Device(e.to_string())
}

impl PenumbraWindowBackend {
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        config: BridgeConfig,
    ) -> Result<Self, BackendError> {
        let raw_window = window.window_handle().map_err(device_error)?.as_raw();
        let raw_display = window.display_handle().map_err(device_error)?.as_raw();
        pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, config))
    }

    async fn from_raw_handles_async(
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
        mut config: BridgeConfig,
    ) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::default();
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(device_error)? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::Device("no adapter".to_string()))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(device_error)?;
        let caps = surface.get_capabilities(&adapter);
        if let Some(&format) = caps.formats.first() {
            config.swapchain_format = format;
        }
        log::info!(
            "penumbra bridge: window device on {} ({:?})",
            adapter.get_info().name,
            config.swapchain_format
        );
        let present = PresentPass::new(&device, config.swapchain_format.add_srgb_suffix(), config.tone_mapping);
        drop(surface);
        Ok(Self {
            instance,
            backend: WgpuLightingBackend::new(device, queue),
            present,
            config,
            screen: None,
        })
    }

    pub fn backend(&self) -> &WgpuLightingBackend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut WgpuLightingBackend {
        &mut self.backend
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping) {
        self.config.tone_mapping = tone_mapping;
        self.present.set_tone_mapping(tone_mapping);
    }

    /// The target the host composites into; recreated when the window size changes.
    pub fn screen_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        let (width, height) = (width.max(1), height.max(1));
        match self.screen {
            Some((id, w, h)) if w == width && h == height => return Ok(id),
            Some((id, ..)) => self.backend.destroy_target(id),
            None => {}
        }
        let id = self.backend.create_target(&TargetDesc {
            label: "penumbra_screen",
            width,
            height,
            format: self.config.screen_format,
            filter: FilterMode::Bilinear,
        })?;
        self.screen = Some((id, width, height));
        Ok(id)
    }

    fn surface_config(&self, width: u32, height: u32) -> wgpu::SurfaceConfiguration {
        let format = self.config.swapchain_format;
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![format.add_srgb_suffix()],
            desired_maximum_frame_latency: 2,
        }
    }

    /// Tone map the screen target onto the window.
    pub fn present(
        &self,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), BackendError> {
        let Some((screen, width, height)) = self.screen else {
            return Ok(());
        };
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { self.instance.create_surface_unsafe(target).map_err(device_error)? };
        let config = self.surface_config(width, height);
        let device = self.backend.device();
        surface.configure(device, &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                surface.configure(device, &config);
                surface.get_current_texture().map_err(device_error)?
            }
            Err(e) => return Err(device_error(e)),
        };
        let output = frame.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(config.format.add_srgb_suffix()),
            ..Default::default()
        });
        let screen_view = self
            .backend
            .target(screen)
            .ok_or(BackendError::UnknownTarget(screen))?
            .view();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("penumbra_present") });
        self.present.encode(&mut encoder, device, self.backend.queue(), screen_view, &output);
        self.backend.queue().submit([encoder.finish()]);
        frame.present();
        Ok(())
    }
}
