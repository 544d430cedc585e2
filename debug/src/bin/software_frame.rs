//! Light one frame of the demo scene on the CPU and write it to a PNG.
//! Run: cargo run -p debug --bin software_frame [out.png]

use debug::{activate_all, demo_config, demo_emitters, demo_scene, demo_viewer, render_scene, SCREEN_SIZE};
use penumbra_compositor::{EmitterRegistry, FrameTargets, LightingCompositor, SoftwareBackend};
use render_api::{FilterMode, LightingBackend, PixelFormat, TargetDesc};

fn main() -> Result<(), String> {
    env_logger::init();
    let out = std::env::args().nth(1).unwrap_or_else(|| "penumbra_software.png".to_string());
    let (width, height) = SCREEN_SIZE;
    let viewer = demo_viewer(SCREEN_SIZE);
    let emitters = demo_emitters(0.0);
    let registry = EmitterRegistry::new();
    let _active = activate_all(&registry, &emitters);

    let mut backend = SoftwareBackend::new();
    backend.set_scene(demo_scene(&emitters));
    let desc = |label| TargetDesc { label, width, height, format: PixelFormat::Standard, filter: FilterMode::Bilinear };
    let scene = backend.create_target(&desc("scene")).map_err(|e| e.to_string())?;
    let destination = backend.create_target(&desc("destination")).map_err(|e| e.to_string())?;

    let mut compositor =
        LightingCompositor::new(demo_config(), registry.clone(), &backend, &viewer).map_err(|e| e.to_string())?;
    // a single still frame: let the ambient field settle first
    compositor.request_extra_ambient_cycles(24);
    render_scene(&mut backend, &viewer, scene).map_err(|e| e.to_string())?;
    let outcome = compositor
        .render_frame(&mut backend, &viewer, FrameTargets { scene, destination })
        .map_err(|e| e.to_string())?;
    log::info!("software_frame: {outcome:?}");

    let pixels = backend.image(destination).ok_or("destination target missing")?.to_rgba8();
    let png = image::RgbaImage::from_raw(width, height, pixels).ok_or("pixel buffer size mismatch")?;
    png.save(&out).map_err(|e| e.to_string())?;
    println!("penumbra software_frame: wrote {out}");
    Ok(())
}
