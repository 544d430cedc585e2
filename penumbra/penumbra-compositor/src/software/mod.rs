//! CPU implementation of [`LightingBackend`].
//!
//! Renders the extracted scene into `f32` images with a small triangle
//! rasterizer. Used for headless previews, golden images and to exercise the
//! whole pipeline without a GPU.

mod image;
mod raster;
mod shading;

use std::collections::{HashMap, HashSet};

use render_api::{
    BackendError, ClearMode, EmitterId, ExtractedObject, ExtractedScene, FilterMode, LightingBackend, ParameterBlock,
    ShadingProgram, TargetDesc, TargetId, ViewSetup, VisibilityMask,
};

pub use image::Image;
pub use shading::{OBSTACLE_ABSORPTION, OBSTACLE_SAMPLES};

use shading::Inputs;

#[derive(Default)]
pub struct SoftwareBackend {
    scene: ExtractedScene,
    targets: HashMap<TargetId, Image>,
    labels: HashMap<TargetId, &'static str>,
    writes: HashMap<TargetId, u32>,
    unavailable: HashSet<ShadingProgram>,
    next_id: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `program` from the supported set.
    pub fn without_program(mut self, program: ShadingProgram) -> Self {
        self.unavailable.insert(program);
        self
    }

    /// Replace the scene drawn by subsequent render calls.
    pub fn set_scene(&mut self, scene: ExtractedScene) {
        self.scene = scene;
    }

    pub fn scene_mut(&mut self) -> &mut ExtractedScene {
        &mut self.scene
    }

    pub fn insert(&mut self, object: ExtractedObject) {
        self.scene.insert(object);
    }

    pub fn image(&self, target: TargetId) -> Option<&Image> {
        self.targets.get(&target)
    }

    pub fn image_mut(&mut self, target: TargetId) -> Option<&mut Image> {
        self.targets.get_mut(&target)
    }

    pub fn has_target(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn label(&self, target: TargetId) -> Option<&'static str> {
        self.labels.get(&target).copied()
    }

    /// Number of render calls and blits that wrote `target`.
    pub fn write_count(&self, target: TargetId) -> u32 {
        self.writes.get(&target).copied().unwrap_or(0)
    }

    fn require(&self, program: ShadingProgram) -> Result<(), BackendError> {
        if self.unavailable.contains(&program) {
            return Err(BackendError::MissingProgram(program));
        }
        Ok(())
    }

    // The destination is taken out of the map while it is written so every
    // other target stays readable as an input.
    fn take(&mut self, target: TargetId) -> Result<Image, BackendError> {
        self.targets.remove(&target).ok_or(BackendError::UnknownTarget(target))
    }

    fn put_back(&mut self, target: TargetId, image: Image) {
        self.targets.insert(target, image);
        *self.writes.entry(target).or_default() += 1;
    }

    fn draw(
        &mut self,
        view: &ViewSetup,
        objects: Objects,
        program: Option<ShadingProgram>,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        if let Some(p) = program {
            self.require(p)?;
        }
        let mut image = self.take(target)?;
        if let ClearMode::Color(color) = clear {
            image.clear(color);
        }
        let drawn: Vec<&ExtractedObject> = match objects {
            Objects::Masked(mask) => self.scene.matching(mask),
            Objects::Emitter(id) => self.scene.emitter_geometry(id),
        };
        let inputs = Inputs { targets: &self.targets, params };
        let view_proj = view.view_proj();
        let (width, height) = (image.width, image.height);
        let mut result = Ok(());
        for object in drawn {
            raster::rasterize(object, &view_proj, width, height, |x, y, object_uv| {
                if result.is_err() {
                    return;
                }
                let uv = [(x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32];
                match shading::shade_fragment(object, program, view, uv, object_uv, &inputs) {
                    Ok(Some((color, blend))) => image.blend(x, y, color, blend),
                    Ok(None) => {}
                    Err(e) => result = Err(e),
                }
            });
        }
        self.put_back(target, image);
        result
    }
}

enum Objects {
    Masked(VisibilityMask),
    Emitter(EmitterId),
}

impl LightingBackend for SoftwareBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, BackendError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::InvalidSize { width: desc.width, height: desc.height });
        }
        self.next_id += 1;
        let id = TargetId(self.next_id);
        self.targets.insert(id, Image::new(desc.width, desc.height, desc.format, desc.filter));
        self.labels.insert(id, desc.label);
        log::trace!("software target {:?} {} {}x{}", id, desc.label, desc.width, desc.height);
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
        self.labels.remove(&target);
        self.writes.remove(&target);
    }

    fn set_filter_mode(&mut self, target: TargetId, filter: FilterMode) -> Result<(), BackendError> {
        let image = self.targets.get_mut(&target).ok_or(BackendError::UnknownTarget(target))?;
        image.filter = filter;
        Ok(())
    }

    fn filter_mode(&self, target: TargetId) -> Option<FilterMode> {
        self.targets.get(&target).map(|i| i.filter)
    }

    fn has_program(&self, program: ShadingProgram) -> bool {
        !self.unavailable.contains(&program)
    }

    fn render_from(
        &mut self,
        view: &ViewSetup,
        mask: VisibilityMask,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        self.draw(view, Objects::Masked(mask), None, target, clear, params)
    }

    fn render_with_override_shading(
        &mut self,
        view: &ViewSetup,
        mask: VisibilityMask,
        program: ShadingProgram,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        self.draw(view, Objects::Masked(mask), Some(program), target, clear, params)
    }

    fn render_emitter(
        &mut self,
        view: &ViewSetup,
        emitter: EmitterId,
        program: Option<ShadingProgram>,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        self.draw(view, Objects::Emitter(emitter), program, target, clear, params)
    }

    fn blit(
        &mut self,
        source: TargetId,
        destination: TargetId,
        program: Option<ShadingProgram>,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        if source == destination {
            return Err(BackendError::Aliased(source));
        }
        if let Some(p) = program {
            self.require(p)?;
        }
        if !self.targets.contains_key(&source) {
            return Err(BackendError::UnknownTarget(source));
        }
        let mut image = self.take(destination)?;
        let blend = program.map(ShadingProgram::blend).unwrap_or(render_api::BlendMode::Replace);
        let mut result = Ok(());
        if let Some(src) = self.targets.get(&source) {
            let inputs = Inputs { targets: &self.targets, params };
            let (width, height) = (image.width, image.height);
            'rows: for y in 0..height {
                for x in 0..width {
                    match shading::blit_texel(src, (x, y, width, height), program, &inputs) {
                        Ok(value) => image.blend(x, y, value, blend),
                        Err(e) => {
                            result = Err(e);
                            break 'rows;
                        }
                    }
                }
            }
        }
        self.put_back(destination, image);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::{LightEmitter, ParamName, PixelFormat, Projection};

    fn view() -> ViewSetup {
        ViewSetup::new([0.0, 0.0, -10.0], Projection::Orthographic { half_height: 4.0, aspect: 1.0 }, 10.0)
    }

    fn target(backend: &mut SoftwareBackend, size: u32) -> TargetId {
        backend
            .create_target(&TargetDesc {
                label: "test",
                width: size,
                height: size,
                format: PixelFormat::Hdr,
                filter: FilterMode::Nearest,
            })
            .unwrap()
    }

    #[test]
    fn emitter_falloff_has_no_seams() {
        let mut backend = SoftwareBackend::new();
        backend.insert(ExtractedObject::light_quad(1, EmitterId(1), [0.0; 3], 4.0, [1.0; 4]));
        let light = target(&mut backend, 8);
        backend
            .render_from(&view(), VisibilityMask::LIGHT_SOURCE, light, ClearMode::TRANSPARENT, &ParameterBlock::new())
            .unwrap();
        let image = backend.image(light).unwrap();
        for y in 0..8u32 {
            for x in 0..8u32 {
                let d = [(x as f32 + 0.5) / 4.0 - 1.0, (y as f32 + 0.5) / 4.0 - 1.0];
                let expected = (1.0 - (d[0] * d[0] + d[1] * d[1]).sqrt()).max(0.0);
                assert!((image.get(x as i64, y as i64)[0] - expected).abs() < 1e-4, "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn line_light_follows_its_segment() {
        let mut backend = SoftwareBackend::new();
        let emitter = LightEmitter::line(EmitterId(1), [0.0; 3], [2.0, 0.0], [1.0; 4], 3.0);
        backend.insert(ExtractedObject::light_for(1, &emitter));
        let light = target(&mut backend, 16);
        backend
            .render_from(&view(), VisibilityMask::LIGHT_SOURCE, light, ClearMode::TRANSPARENT, &ParameterBlock::new())
            .unwrap();
        let image = backend.image(light).unwrap();
        // texel centres at world (2.25, 0.25), (-2.25, 0.25) and (1.25, 0.25)
        let past_end = image.get(12, 7)[0];
        let behind_origin = image.get(3, 7)[0];
        let over_segment = image.get(10, 7)[0];
        let expected_past_end = 1.0 - (0.25f32 * 0.25 + 0.25 * 0.25).sqrt() / 3.0;
        assert!((past_end - expected_past_end).abs() < 1e-4, "past end {past_end}");
        assert!((over_segment - (1.0 - 0.25 / 3.0)).abs() < 1e-4, "over segment {over_segment}");
        assert!(behind_origin > 0.0);
        assert!(past_end > behind_origin * 2.0, "past end {past_end} behind origin {behind_origin}");
    }

    #[test]
    fn obstacles_dim_light_behind_them() {
        let mut backend = SoftwareBackend::new();
        backend.insert(ExtractedObject::light_quad(1, EmitterId(1), [0.0; 3], 4.0, [1.0; 4]));
        backend.insert(ExtractedObject::quad(2, [2.0, 0.0, 0.0], [0.5, 4.0], [0.0, 0.0, 0.0, 1.0], VisibilityMask::OBSTACLE));
        let obstacles = target(&mut backend, 16);
        let light = target(&mut backend, 16);
        let params = ParameterBlock::new();
        backend.render_from(&view(), VisibilityMask::OBSTACLE, obstacles, ClearMode::TRANSPARENT, &params).unwrap();
        let mut params = ParameterBlock::new();
        params.set_texture(ParamName::ObstacleTexture, Some(obstacles));
        params.set_vec2(ParamName::ExtendedToSmallScale, [1.0, 1.0]);
        backend.render_from(&view(), VisibilityMask::LIGHT_SOURCE, light, ClearMode::TRANSPARENT, &params).unwrap();
        let image = backend.image(light).unwrap();
        // same distance from the emitter, left side open, right side behind the wall
        let open = image.get(3, 8)[0];
        let shadowed = image.get(12, 8)[0];
        assert!(open > 0.0);
        assert!(shadowed < open * 0.9, "open {open} shadowed {shadowed}");
    }

    #[test]
    fn missing_programs_and_aliasing_are_errors() {
        let mut backend = SoftwareBackend::new().without_program(ShadingProgram::BlurHorizontal);
        assert!(!backend.has_program(ShadingProgram::BlurHorizontal));
        let a = target(&mut backend, 4);
        let b = target(&mut backend, 4);
        let params = ParameterBlock::new();
        assert!(matches!(
            backend.blit(a, b, Some(ShadingProgram::BlurHorizontal), &params),
            Err(BackendError::MissingProgram(ShadingProgram::BlurHorizontal))
        ));
        assert!(matches!(backend.blit(a, a, None, &params), Err(BackendError::Aliased(_))));
        assert!(matches!(backend.blit(a, TargetId(99), None, &params), Err(BackendError::UnknownTarget(_))));
        assert!(backend.has_target(b));
        assert_eq!(backend.write_count(b), 0);
    }

    #[test]
    fn copy_blit_is_exact() {
        let mut backend = SoftwareBackend::new();
        let a = target(&mut backend, 4);
        let b = target(&mut backend, 4);
        backend.image_mut(a).unwrap().set(1, 2, [0.3, 0.6, 0.9, 1.0]);
        backend.blit(a, b, None, &ParameterBlock::new()).unwrap();
        assert_eq!(backend.image(a), backend.image(b));
        assert_eq!(backend.write_count(b), 1);
    }
}
