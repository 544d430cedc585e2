//! Light one frame of the demo scene on the GPU without a window and write it to a PNG.
//! Run: cargo run -p debug --bin headless_frame [out.png]

use debug::{activate_all, demo_config, demo_emitters, demo_scene, demo_viewer, render_scene, SCREEN_SIZE};
use penumbra_bridge::WgpuLightingBackend;
use penumbra_compositor::{EmitterRegistry, FrameOutcome, FrameTargets, LightingCompositor, PipelineConfig};
use render_api::{FilterMode, LightingBackend, PixelFormat, TargetDesc};

const FRAMES: u32 = 30;

fn main() -> Result<(), String> {
    env_logger::init();
    let out = std::env::args().nth(1).unwrap_or_else(|| "penumbra_headless.png".to_string());
    let (device, queue) = pollster::block_on(request_device())?;
    let mut backend = WgpuLightingBackend::new(device, queue);

    let (width, height) = SCREEN_SIZE;
    let viewer = demo_viewer(SCREEN_SIZE);
    let registry = EmitterRegistry::new();
    let emitters = demo_emitters(0.0);
    let _active = activate_all(&registry, &emitters);
    backend.prepare(&demo_scene(&emitters));

    let desc = |label, format| TargetDesc { label, width, height, format, filter: FilterMode::Bilinear };
    let scene = backend.create_target(&desc("scene", PixelFormat::Standard)).map_err(|e| e.to_string())?;
    let destination = backend.create_target(&desc("destination", PixelFormat::Hdr)).map_err(|e| e.to_string())?;
    let config = PipelineConfig { hdr_enabled: true, ..demo_config() };
    let mut compositor =
        LightingCompositor::new(config, registry.clone(), &backend, &viewer).map_err(|e| e.to_string())?;

    for frame in 0..FRAMES {
        render_scene(&mut backend, &viewer, scene).map_err(|e| e.to_string())?;
        let outcome = compositor
            .render_frame(&mut backend, &viewer, FrameTargets { scene, destination })
            .map_err(|e| e.to_string())?;
        if let FrameOutcome::Lit(report) = outcome {
            log::debug!("frame {frame}: {} emitters, {} ambient steps", report.emitters, report.ambient_steps);
        } else {
            log::warn!("frame {frame}: {outcome:?}");
        }
    }

    let (w, h, pixels) = backend.read_rgba8(destination).map_err(|e| e.to_string())?;
    let png = image::RgbaImage::from_raw(w, h, pixels).ok_or("pixel buffer size mismatch")?;
    png.save(&out).map_err(|e| e.to_string())?;
    compositor.release(&mut backend);
    println!("penumbra headless_frame: wrote {out} after {FRAMES} frames");
    Ok(())
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| e.to_string())
}
