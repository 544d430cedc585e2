//! Interactive demo: the demo scene lit on the GPU and presented to a window.
//! Arrows pan the viewer, Space toggles lighting, T toggles tone mapping,
//! A requests extra ambient cycles.
//! Run: cargo run -p debug --bin lighting_window

use std::time::Instant;

use debug::{activate_all, demo_config, demo_emitters, demo_scene, demo_viewer, render_scene, sync_emitters};
use penumbra_bridge::{BridgeConfig, PenumbraWindowBackend, ToneMapping};
use penumbra_compositor::{ActiveEmitter, EmitterRegistry, FrameTargets, LightingCompositor};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{FilterMode, LightingBackend, PixelFormat, TargetDesc, TargetId};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowId;

const PAN_STEP: f32 = 0.25;

struct App {
    window: Option<winit::window::Window>,
    backend: Option<PenumbraWindowBackend>,
    compositor: Option<LightingCompositor>,
    registry: EmitterRegistry,
    active: Vec<ActiveEmitter>,
    /// Scene colour target and its size.
    scene: Option<(TargetId, u32, u32)>,
    size: (u32, u32),
    pan: [f32; 2],
    started: Instant,
}

impl App {
    fn new() -> Self {
        let registry = EmitterRegistry::new();
        let active = activate_all(&registry, &demo_emitters(0.0));
        Self {
            window: None,
            backend: None,
            compositor: None,
            registry,
            active,
            scene: None,
            size: (800, 500),
            pan: [0.0, 0.0],
            started: Instant::now(),
        }
    }

    fn scene_target(&mut self) -> Result<TargetId, String> {
        let (width, height) = self.size;
        let backend = self.backend.as_mut().ok_or("no backend")?.backend_mut();
        match self.scene {
            Some((id, w, h)) if (w, h) == (width, height) => return Ok(id),
            Some((id, ..)) => backend.destroy_target(id),
            None => {}
        }
        let id = backend
            .create_target(&TargetDesc {
                label: "scene",
                width,
                height,
                format: PixelFormat::Standard,
                filter: FilterMode::Bilinear,
            })
            .map_err(|e| e.to_string())?;
        self.scene = Some((id, width, height));
        Ok(id)
    }

    fn redraw(&mut self) -> Result<(), String> {
        let Some(window) = &self.window else {
            return Ok(());
        };
        let phys = window.inner_size();
        self.size = (phys.width.max(1), phys.height.max(1));
        let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
            (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
            _ => return Ok(()),
        };
        if self.backend.is_none() {
            self.backend = Some(PenumbraWindowBackend::from_window(window, BridgeConfig::default()).map_err(|e| e.to_string())?);
        }

        let mut viewer = demo_viewer(self.size);
        viewer.position[0] += self.pan[0];
        viewer.position[1] += self.pan[1];
        let scene = self.scene_target()?;
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let screen = backend.screen_target(self.size.0, self.size.1).map_err(|e| e.to_string())?;
        if self.compositor.is_none() {
            let compositor = LightingCompositor::new(demo_config(), self.registry.clone(), backend.backend(), &viewer)
                .map_err(|e| e.to_string())?;
            self.compositor = Some(compositor);
        }
        let Some(compositor) = self.compositor.as_mut() else {
            return Ok(());
        };

        let emitters = demo_emitters(self.started.elapsed().as_secs_f32());
        sync_emitters(&self.active, &emitters);
        backend.backend_mut().prepare(&demo_scene(&emitters));
        render_scene(backend.backend_mut(), &viewer, scene).map_err(|e| e.to_string())?;
        compositor
            .render_frame(backend.backend_mut(), &viewer, FrameTargets { scene, destination: screen })
            .map_err(|e| e.to_string())?;
        backend.present(raw_window, raw_display).map_err(|e| e.to_string())
    }

    fn key(&mut self, key: Key) {
        match key.as_ref() {
            Key::Named(NamedKey::ArrowLeft) => self.pan[0] -= PAN_STEP,
            Key::Named(NamedKey::ArrowRight) => self.pan[0] += PAN_STEP,
            Key::Named(NamedKey::ArrowUp) => self.pan[1] += PAN_STEP,
            Key::Named(NamedKey::ArrowDown) => self.pan[1] -= PAN_STEP,
            Key::Named(NamedKey::Space) => {
                if let Some(c) = self.compositor.as_mut() {
                    c.set_enabled(!c.is_enabled());
                    log::info!("lighting {}", if c.is_enabled() { "on" } else { "off" });
                }
            }
            Key::Character("t") => {
                if let Some(b) = self.backend.as_mut() {
                    let next = match b.config().tone_mapping {
                        ToneMapping::Reinhard => ToneMapping::None,
                        ToneMapping::None => ToneMapping::Reinhard,
                    };
                    log::info!("tone mapping {next:?}");
                    b.set_tone_mapping(next);
                }
            }
            Key::Character("a") => {
                if let Some(c) = self.compositor.as_mut() {
                    c.request_extra_ambient_cycles(16);
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Penumbra lighting")
            .with_inner_size(winit::dpi::LogicalSize::new(self.size.0, self.size.1));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("create window failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let (Some(compositor), Some(backend)) = (self.compositor.as_mut(), self.backend.as_mut()) {
                    compositor.release(backend.backend_mut());
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                self.key(event.logical_key);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    log::error!("frame failed: {e}");
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new();
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
