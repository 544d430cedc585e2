//! Penumbra compositor: image-space 2D lighting (obstacles, emitters, ambient diffusion) composited onto a rendered scene.

pub mod ambient;
pub mod blur;
pub mod composite;
pub mod config;
pub mod diagnostics;
pub mod emitters;
pub mod error;
pub mod graph;
pub mod light_pass;
pub mod obstacle_pass;
pub mod planner;
pub mod pool;
pub mod software;

use render_api::{LightingBackend, ParameterBlock, Projection, ShadingProgram, TargetId, ViewSetup};

pub use ambient::AmbientState;
pub use blur::BlurSettings;
pub use config::{ConfigError, PipelineConfig};
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use emitters::{ActiveEmitter, EmitterRegistry};
pub use error::{CompositorError, SetupError};
pub use graph::{FrameContext, FrameGraph, FrameNode, NodeId, ResourceUsage};
pub use planner::{BufferSize, LightResolutions, PlanError};
pub use pool::{BufferId, BufferPool, OffscreenBuffer, PoolError};
pub use software::SoftwareBackend;

use ambient::AmbientPass;
use blur::LightBlurPass;
use composite::{composite_mapping, CompositePass};
use config::BufferLayoutKey;
use diagnostics::report;
use light_pass::{add_light_source_passes, LightParamsPass, NormalPass};
use obstacle_pass::ObstaclePass;

/// The primary viewer the compositor lights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewerState {
    pub position: [f32; 3],
    pub projection: Projection,
    /// Distance to the lit plane; perspective viewers only.
    pub plane_distance: f32,
    /// Pixel size of the scene and destination targets.
    pub screen_size: (u32, u32),
    /// The viewer already renders into a target handed to it by its caller.
    pub renders_to_caller_target: bool,
}

impl ViewerState {
    /// Orthographic viewer with its aspect taken from `screen_size`.
    pub fn orthographic(position: [f32; 3], half_height: f32, screen_size: (u32, u32)) -> Self {
        let aspect = screen_size.0 as f32 / screen_size.1.max(1) as f32;
        Self {
            position,
            projection: Projection::Orthographic { half_height, aspect },
            plane_distance: position[2].abs(),
            screen_size,
            renders_to_caller_target: false,
        }
    }

    pub fn view(&self) -> ViewSetup {
        ViewSetup::new(self.position, self.projection, self.plane_distance)
    }

    fn validate(&self) -> Result<(), SetupError> {
        if self.screen_size.0 == 0 || self.screen_size.1 == 0 {
            return Err(SetupError::InvalidViewer("screen size must be non-zero"));
        }
        if !self.position.iter().all(|v| v.is_finite()) {
            return Err(SetupError::InvalidViewer("position must be finite"));
        }
        Ok(())
    }
}

/// Host-owned targets for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTargets {
    /// Rendered scene colour. With isolation this is [`LightingCompositor::isolation_target`].
    pub scene: TargetId,
    pub destination: TargetId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub resolutions: LightResolutions,
    /// Visible emitters this frame.
    pub emitters: usize,
    pub ambient_steps: u32,
    /// Some buffer was (re)allocated this frame.
    pub reallocated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameOutcome {
    Lit(FrameReport),
    /// Light buffers could not be planned; the scene was copied through unlit.
    Unlit(PlanError),
    /// Lighting is disabled; the scene was copied through unlit.
    Inactive,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CachedPlan {
    projection: Projection,
    plane_distance: f32,
    layout: BufferLayoutKey,
    result: Result<LightResolutions, PlanError>,
}

// Viewer properties that decide which features survive setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ViewerKey {
    perspective: bool,
    caller_target: bool,
}

impl ViewerKey {
    fn of(viewer: &ViewerState) -> Self {
        Self { perspective: viewer.projection.is_perspective(), caller_target: viewer.renders_to_caller_target }
    }
}

/// Switch off requested features the viewer or backend cannot support.
/// Returns the effective config and whether the opacity override sub-pass runs.
fn resolve_features(
    requested: &PipelineConfig,
    backend: &dyn LightingBackend,
    viewer: &ViewerState,
    diagnostics: &mut Vec<Diagnostic>,
) -> (PipelineConfig, bool) {
    let mut config = requested.clone();
    let missing = |program: ShadingProgram, feature: &str, diagnostics: &mut Vec<Diagnostic>| {
        let available = backend.has_program(program);
        if !available {
            report(
                diagnostics,
                DiagnosticKind::ProgramUnavailable(program),
                format!("program `{}` unavailable, {feature} disabled", program.label()),
            );
        }
        !available
    };

    if config.normal_mapping_enabled && viewer.projection.is_perspective() {
        config.normal_mapping_enabled = false;
        report(
            diagnostics,
            DiagnosticKind::NormalMappingDisabled,
            "normal mapping needs an orthographic viewer, disabled".to_string(),
        );
    }
    if config.normal_mapping_enabled {
        for program in [ShadingProgram::NormalBuffer, ShadingProgram::NormalMappedLight, ShadingProgram::LightBlend] {
            if missing(program, "normal mapping", diagnostics) {
                config.normal_mapping_enabled = false;
                break;
            }
        }
    }
    if config.isolate_to_this_viewer && viewer.renders_to_caller_target {
        config.isolate_to_this_viewer = false;
        report(
            diagnostics,
            DiagnosticKind::IsolationDisabled,
            "isolation is unavailable for a viewer that renders to a caller target, disabled".to_string(),
        );
    }
    if config.isolate_to_this_viewer && missing(ShadingProgram::AlphaOver, "isolation", diagnostics) {
        config.isolate_to_this_viewer = false;
    }
    if config.obstacle_antialiasing && missing(ShadingProgram::ObstacleDownsample, "obstacle antialiasing", diagnostics) {
        config.obstacle_antialiasing = false;
    }
    if (config.light_source_blur_enabled || config.ambient_blur_enabled)
        && (missing(ShadingProgram::BlurHorizontal, "blur", diagnostics)
            || missing(ShadingProgram::BlurVertical, "blur", diagnostics))
    {
        config.light_source_blur_enabled = false;
        config.ambient_blur_enabled = false;
    }
    if config.ambient_enabled && missing(ShadingProgram::AmbientIntegrate, "ambient", diagnostics) {
        config.ambient_enabled = false;
    }
    let opacity_override = !missing(ShadingProgram::ObstacleOpacity, "obstacle opacity override", diagnostics);
    (config, opacity_override)
}

/// Lighting for one viewer: owns its buffers, parameters and ambient history.
pub struct LightingCompositor {
    requested: PipelineConfig,
    config: PipelineConfig,
    opacity_override: bool,
    viewer_key: ViewerKey,
    registry: EmitterRegistry,
    pool: BufferPool,
    params: ParameterBlock,
    ambient: AmbientState,
    plan: Option<CachedPlan>,
    reported_plan_error: Option<PlanError>,
    diagnostics: Vec<Diagnostic>,
    enabled: bool,
}

impl LightingCompositor {
    /// Set up lighting for `viewer`. Unsupported optional features are
    /// switched off with a diagnostic; a missing `Composite` program or an
    /// unusable viewer is fatal.
    pub fn new(
        config: PipelineConfig,
        registry: EmitterRegistry,
        backend: &dyn LightingBackend,
        viewer: &ViewerState,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        viewer.validate()?;
        if !backend.has_program(ShadingProgram::Composite) {
            return Err(SetupError::MissingProgram(ShadingProgram::Composite));
        }
        let mut diagnostics = Vec::new();
        let (effective, opacity_override) = resolve_features(&config, backend, viewer, &mut diagnostics);
        log::info!(
            "penumbra: compositor ready (density {}, ambient {}, normal mapping {}, isolation {})",
            effective.light_pixel_density,
            effective.ambient_enabled,
            effective.normal_mapping_enabled,
            effective.isolate_to_this_viewer
        );
        Ok(Self {
            requested: config,
            config: effective,
            opacity_override,
            viewer_key: ViewerKey::of(viewer),
            registry,
            pool: BufferPool::new(),
            params: ParameterBlock::new(),
            ambient: AmbientState::default(),
            plan: None,
            reported_plan_error: None,
            diagnostics,
            enabled: true,
        })
    }

    /// Effective configuration after downgrades.
    pub fn config(&self) -> &PipelineConfig { &self.config }
    pub fn requested_config(&self) -> &PipelineConfig { &self.requested }
    pub fn registry(&self) -> &EmitterRegistry { &self.registry }
    pub fn diagnostics(&self) -> &[Diagnostic] { &self.diagnostics }
    pub fn pool(&self) -> &BufferPool { &self.pool }
    pub fn params(&self) -> &ParameterBlock { &self.params }
    pub fn ambient_state(&self) -> &AmbientState { &self.ambient }
    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Replace the configuration. Buffer-affecting changes re-plan and
    /// re-ensure buffers on the next frame.
    pub fn set_config(
        &mut self,
        config: PipelineConfig,
        backend: &dyn LightingBackend,
        viewer: &ViewerState,
    ) -> Result<(), SetupError> {
        config.validate()?;
        let (effective, opacity_override) = resolve_features(&config, backend, viewer, &mut self.diagnostics);
        if effective.ambient_enabled && !self.config.ambient_enabled {
            self.ambient.reset_history();
        }
        self.requested = config;
        self.config = effective;
        self.opacity_override = opacity_override;
        self.viewer_key = ViewerKey::of(viewer);
        Ok(())
    }

    /// While disabled, frames copy the scene through unlit. Ambient contents
    /// and requested extra cycles carry over.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Run `cycles` additional ambient integration steps next frame.
    pub fn request_extra_ambient_cycles(&mut self, cycles: u32) {
        self.ambient.request_extra_cycles(cycles);
    }

    pub fn buffer_target(&self, id: BufferId) -> Option<TargetId> {
        self.pool.get(id).map(|b| b.target)
    }

    /// Latest ambient field, if one has been integrated.
    pub fn ambient_target(&self) -> Option<TargetId> {
        let current = self.ambient.current();
        if self.config.ambient_enabled && self.pool.is_valid(current) {
            self.buffer_target(current)
        } else {
            None
        }
    }

    /// Screen-sized target the host renders its scene into when this viewer
    /// is isolated. `None` without isolation.
    pub fn isolation_target(
        &mut self,
        backend: &mut dyn LightingBackend,
        viewer: &ViewerState,
    ) -> Result<Option<TargetId>, CompositorError> {
        if !self.config.isolate_to_this_viewer {
            return Ok(None);
        }
        let (w, h) = viewer.screen_size;
        self.pool.ensure(backend, BufferId::IsolatedScene, w, h, self.config.pixel_format(), self.config.filter_mode)?;
        Ok(Some(self.pool.target(BufferId::IsolatedScene)?))
    }

    /// Free every buffer this compositor owns.
    pub fn release(&mut self, backend: &mut dyn LightingBackend) {
        self.pool.release_all(backend);
        self.ambient.reset_history();
        self.plan = None;
    }

    fn resolutions(&mut self, viewer: &ViewerState) -> Result<LightResolutions, PlanError> {
        let layout = self.config.layout_key();
        if let Some(cached) = &self.plan {
            if cached.projection == viewer.projection
                && cached.plane_distance == viewer.plane_distance
                && cached.layout == layout
            {
                return cached.result;
            }
        }
        let result = planner::plan(
            &viewer.projection,
            viewer.plane_distance,
            self.config.light_pixel_density,
            self.config.extended_margin,
        );
        if let Ok(res) = &result {
            log::debug!("penumbra: planned light buffers {:?} / {:?}", res.small, res.extended);
        }
        self.plan = Some(CachedPlan {
            projection: viewer.projection,
            plane_distance: viewer.plane_distance,
            layout,
            result,
        });
        result
    }

    fn report_plan_error(&mut self, error: PlanError) {
        if self.reported_plan_error == Some(error) {
            return;
        }
        self.reported_plan_error = Some(error);
        let kind = match error {
            PlanError::DensityTooCoarse { .. } => DiagnosticKind::DensityTooCoarse,
            PlanError::DensityTooFine { .. } => DiagnosticKind::DensityTooFine,
            PlanError::InvalidProjection(_) => DiagnosticKind::InvalidProjection,
        };
        report(&mut self.diagnostics, kind, format!("lighting skipped: {error}"));
    }

    fn ensure_buffers(
        &mut self,
        backend: &mut dyn LightingBackend,
        res: &LightResolutions,
        viewer: &ViewerState,
    ) -> Result<bool, CompositorError> {
        let config = &self.config;
        let screen = BufferSize::new(viewer.screen_size.0, viewer.screen_size.1);
        let mut wanted = vec![
            (BufferId::Obstacle, res.extended),
            (BufferId::LightSource, res.small),
            (BufferId::ScreenComposite, screen),
        ];
        if config.obstacle_antialiasing {
            wanted.push((BufferId::ObstacleUpsample, res.extended.scaled(2)));
        }
        if config.light_source_blur_enabled {
            wanted.push((BufferId::LightSourceBlur, res.small));
        }
        if config.normal_mapping_enabled {
            wanted.extend([BufferId::Normals, BufferId::EmitterColor, BufferId::EmitterShading].map(|id| (id, res.small)));
        }
        if config.ambient_enabled {
            wanted.extend([BufferId::AmbientA, BufferId::AmbientB, BufferId::AmbientEmission].map(|id| (id, res.extended)));
        }
        if config.isolate_to_this_viewer {
            wanted.push((BufferId::IsolatedScene, screen));
        }
        let (format, filter) = (config.pixel_format(), config.filter_mode);
        let mut reallocated = false;
        for id in BufferId::ALL {
            match wanted.iter().find(|(w, _)| *w == id) {
                Some((_, size)) => {
                    reallocated |= self.pool.ensure(backend, id, size.width, size.height, format, filter)?;
                }
                None => self.pool.release(backend, id),
            }
        }
        Ok(reallocated)
    }

    /// Light one frame: `targets.scene` is lit into `targets.destination`.
    pub fn render_frame(
        &mut self,
        backend: &mut dyn LightingBackend,
        viewer: &ViewerState,
        targets: FrameTargets,
    ) -> Result<FrameOutcome, CompositorError> {
        if !self.enabled {
            composite::blit_unlit(backend, targets.scene, targets.destination, self.config.isolate_to_this_viewer, &self.params)?;
            return Ok(FrameOutcome::Inactive);
        }
        if ViewerKey::of(viewer) != self.viewer_key {
            let (effective, opacity_override) =
                resolve_features(&self.requested, &*backend, viewer, &mut self.diagnostics);
            self.config = effective;
            self.opacity_override = opacity_override;
            self.viewer_key = ViewerKey::of(viewer);
        }
        let resolutions = match self.resolutions(viewer) {
            Ok(res) => res,
            Err(error) => {
                self.report_plan_error(error);
                composite::blit_unlit(backend, targets.scene, targets.destination, self.config.isolate_to_this_viewer, &self.params)?;
                return Ok(FrameOutcome::Unlit(error));
            }
        };
        self.reported_plan_error = None;
        let reallocated = self.ensure_buffers(backend, &resolutions, viewer)?;

        let config = &self.config;
        let density = config.light_pixel_density;
        let light_position = planner::snap_to_texel(viewer.position, density);
        let small_view = ViewSetup::new(light_position, resolutions.small_projection, viewer.plane_distance);
        let extended_view = ViewSetup::new(light_position, resolutions.extended_projection, viewer.plane_distance);
        let emitters = self.registry.snapshot(&small_view.visible_rect());
        let mapping = composite_mapping(
            viewer.position,
            light_position,
            viewer.projection.half_extent_at(viewer.plane_distance),
            &resolutions,
        );
        let blur_settings = |enabled: bool| {
            enabled.then_some(BlurSettings {
                radius: config.blur_radius,
                downsample: config.blur_downsample,
                iterations: config.blur_iterations,
            })
        };

        let mut graph = FrameGraph::new();
        let obstacles = ObstaclePass {
            view: extended_view,
            antialiasing: config.obstacle_antialiasing,
            opacity_override: self.opacity_override,
        };
        let usage = obstacles.usage();
        graph.add_node(Box::new(obstacles), usage);
        graph.add_node(
            Box::new(LightParamsPass {
                density,
                extended_to_small: resolutions.extended_to_small_scale(),
                texel_offset: mapping.uv_offset,
                hdr: config.hdr_enabled,
                perspective: viewer.projection.is_perspective(),
            }),
            LightParamsPass::usage(),
        );
        if config.normal_mapping_enabled {
            graph.add_node(
                Box::new(NormalPass { view: small_view }),
                vec![(BufferId::Normals, ResourceUsage::Write)],
            );
        }
        add_light_source_passes(&mut graph, small_view, &emitters, config.normal_mapping_enabled);
        if let Some(settings) = blur_settings(config.light_source_blur_enabled) {
            graph.add_node(Box::new(LightBlurPass { settings }), LightBlurPass::usage());
        }
        if config.ambient_enabled {
            graph.add_node(
                Box::new(AmbientPass {
                    view: extended_view,
                    size: resolutions.extended,
                    density,
                    persistence: config.ambient_persistence,
                    cycles: config.ambient_cycles_per_frame(),
                    blur: blur_settings(config.ambient_blur_enabled),
                }),
                AmbientPass::usage(),
            );
        }
        let composite = CompositePass {
            scene: targets.scene,
            destination: targets.destination,
            mapping,
            ambient: config.ambient_enabled,
            isolated: config.isolate_to_this_viewer,
        };
        let usage = composite.usage();
        graph.add_node(Box::new(composite), usage);

        let mut ctx = FrameContext {
            backend,
            pool: &mut self.pool,
            params: &mut self.params,
            ambient: &mut self.ambient,
        };
        graph.execute(&mut ctx)?;

        let ambient_steps = if self.config.ambient_enabled { self.ambient.steps_last_frame() } else { 0 };
        self.ambient.end_frame();
        Ok(FrameOutcome::Lit(FrameReport {
            resolutions,
            emitters: emitters.len(),
            ambient_steps,
            reallocated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::{
        ClearMode, EmitterId, ExtractedObject, FilterMode, LightEmitter, PixelFormat, TargetDesc, VisibilityMask,
    };
    use software::Image;

    const SCREEN: (u32, u32) = (32, 32);

    fn viewer() -> ViewerState {
        ViewerState::orthographic([0.0, 0.0, -10.0], 4.0, SCREEN)
    }

    fn base_config() -> PipelineConfig {
        PipelineConfig { light_pixel_density: 4.0, extended_margin: 1.0, ..Default::default() }
    }

    struct Rig {
        backend: SoftwareBackend,
        registry: EmitterRegistry,
        scene: TargetId,
        destination: TargetId,
    }

    impl Rig {
        fn new(backend: SoftwareBackend) -> Self {
            let mut backend = backend;
            let mut target = |label| {
                backend
                    .create_target(&TargetDesc {
                        label,
                        width: SCREEN.0,
                        height: SCREEN.1,
                        format: PixelFormat::Standard,
                        filter: FilterMode::Nearest,
                    })
                    .unwrap()
            };
            let scene = target("scene");
            let destination = target("destination");
            backend.image_mut(scene).unwrap().clear([1.0; 4]);
            Rig { backend, registry: EmitterRegistry::new(), scene, destination }
        }

        fn with_emitter(mut self, id: u64, origin: [f32; 3], radius: f32) -> Self {
            self.backend.insert(ExtractedObject::light_quad(100 + id, EmitterId(id), origin, radius, [1.0; 4]));
            self.registry.register(LightEmitter::point(EmitterId(id), origin, [1.0; 4], radius));
            self
        }

        fn compositor(&self, config: PipelineConfig, viewer: &ViewerState) -> Result<LightingCompositor, SetupError> {
            LightingCompositor::new(config, self.registry.clone(), &self.backend, viewer)
        }

        fn frame(&mut self, compositor: &mut LightingCompositor, viewer: &ViewerState) -> FrameOutcome {
            let targets = FrameTargets { scene: self.scene, destination: self.destination };
            compositor.render_frame(&mut self.backend, viewer, targets).unwrap()
        }

        fn buffer(&self, compositor: &LightingCompositor, id: BufferId) -> Image {
            self.backend.image(compositor.buffer_target(id).unwrap()).unwrap().clone()
        }
    }

    fn lit(outcome: FrameOutcome) -> FrameReport {
        match outcome {
            FrameOutcome::Lit(report) => report,
            other => panic!("expected a lit frame, got {other:?}"),
        }
    }

    #[test]
    fn extended_buffer_for_size_five_margin_three_is_320() {
        let mut rig = Rig::new(SoftwareBackend::new());
        let viewer = ViewerState::orthographic([0.0, 0.0, -10.0], 5.0, SCREEN);
        let config = PipelineConfig { light_pixel_density: 20.0, extended_margin: 3.0, ..Default::default() };
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        let report = lit(rig.frame(&mut compositor, &viewer));
        assert_eq!(report.resolutions.extended.height, 320);
        assert_eq!(compositor.pool().get(BufferId::Obstacle).unwrap().height, 320);
    }

    #[test]
    fn steady_light_buffer_is_identical_across_frames() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 2.0);
        let config = PipelineConfig { ambient_enabled: false, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        let first = lit(rig.frame(&mut compositor, &viewer));
        assert!(first.reallocated);
        assert_eq!(first.emitters, 1);
        let light_a = rig.buffer(&compositor, BufferId::LightSource);
        let second = lit(rig.frame(&mut compositor, &viewer));
        assert!(!second.reallocated);
        let light_b = rig.buffer(&compositor, BufferId::LightSource);
        assert_eq!(light_a, light_b);
        assert!(light_a.pixels.iter().any(|p| p[0] > 0.0));
        assert_eq!(compositor.pool().reallocations(), 0);
    }

    #[test]
    fn antialiasing_does_not_change_dependent_sizes() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 2.0);
        let viewer = viewer();
        let mut plain = rig.compositor(base_config(), &viewer).unwrap();
        let aa_config = PipelineConfig { obstacle_antialiasing: true, ..base_config() };
        let mut aa = rig.compositor(aa_config, &viewer).unwrap();
        rig.frame(&mut plain, &viewer);
        rig.frame(&mut aa, &viewer);
        for id in [BufferId::Obstacle, BufferId::LightSource, BufferId::AmbientA] {
            let a = plain.pool().get(id).unwrap();
            let b = aa.pool().get(id).unwrap();
            assert_eq!((a.width, a.height), (b.width, b.height), "{id:?}");
        }
        assert!(plain.pool().get(BufferId::ObstacleUpsample).is_none());
        let up = aa.pool().get(BufferId::ObstacleUpsample).unwrap();
        let ext = aa.pool().get(BufferId::Obstacle).unwrap();
        assert_eq!((up.width, up.height), (ext.width * 2, ext.height * 2));
    }

    #[test]
    fn disabled_ambient_never_touches_ambient_buffers() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 2.0);
        let config = PipelineConfig { ambient_enabled: false, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        compositor.request_extra_ambient_cycles(4);
        let report = lit(rig.frame(&mut compositor, &viewer));
        assert_eq!(report.ambient_steps, 0);
        for id in [BufferId::AmbientA, BufferId::AmbientB, BufferId::AmbientEmission] {
            assert!(compositor.pool().get(id).is_none());
        }
        assert!(compositor.ambient_target().is_none());
        assert!(compositor.params().texture(render_api::ParamName::AmbientTexture).is_none());
    }

    #[test]
    fn ambient_converges_for_static_scene() {
        let mut rig = Rig::new(SoftwareBackend::new());
        rig.backend.insert(ExtractedObject::quad(
            1,
            [0.5, 0.0, 0.0],
            [1.5, 1.0],
            [0.6, 0.5, 0.4, 1.0],
            VisibilityMask::AMBIENT_EMISSION,
        ));
        rig.backend.insert(ExtractedObject::quad(
            2,
            [-1.0, 1.0, 0.0],
            [0.5, 2.0],
            [0.0, 0.0, 0.0, 0.8],
            VisibilityMask::OBSTACLE,
        ));
        let config = PipelineConfig { hdr_enabled: true, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        let mut previous: Option<Image> = None;
        let mut deltas = Vec::new();
        for _ in 0..12 {
            rig.frame(&mut compositor, &viewer);
            let current = rig.backend.image(compositor.ambient_target().unwrap()).unwrap().clone();
            if let Some(prev) = &previous {
                deltas.push(current.max_abs_diff(prev));
            }
            previous = Some(current);
        }
        for pair in deltas.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "deltas grew: {deltas:?}");
        }
        assert!(deltas[deltas.len() - 1] < deltas[0] * 0.5, "{deltas:?}");
    }

    #[test]
    fn normal_mapping_is_disabled_for_perspective_viewers() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0, 0.0, 1.0], 2.0);
        let viewer = ViewerState {
            projection: Projection::Perspective { fov_y: 2.0 * (0.4f32).atan(), aspect: 1.0 },
            ..viewer()
        };
        let config = PipelineConfig { normal_mapping_enabled: true, ..base_config() };
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        assert!(!compositor.config().normal_mapping_enabled);
        assert!(compositor.requested_config().normal_mapping_enabled);
        assert!(compositor.diagnostics().iter().any(|d| d.kind == DiagnosticKind::NormalMappingDisabled));
        lit(rig.frame(&mut compositor, &viewer));
        assert!(compositor.pool().get(BufferId::Normals).is_none());
    }

    #[test]
    fn switching_projections_does_not_pile_up_diagnostics() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0, 0.0, 1.0], 2.0);
        let ortho = viewer();
        let persp = ViewerState {
            projection: Projection::Perspective { fov_y: 2.0 * (0.4f32).atan(), aspect: 1.0 },
            ..viewer()
        };
        let config = PipelineConfig { normal_mapping_enabled: true, ..base_config() };
        let mut compositor = rig.compositor(config, &ortho).unwrap();
        for _ in 0..4 {
            rig.frame(&mut compositor, &persp);
            assert!(!compositor.config().normal_mapping_enabled);
            rig.frame(&mut compositor, &ortho);
            assert!(compositor.config().normal_mapping_enabled);
        }
        let downgrades =
            compositor.diagnostics().iter().filter(|d| d.kind == DiagnosticKind::NormalMappingDisabled).count();
        assert_eq!(downgrades, 1);
    }

    #[test]
    fn per_emitter_normal_mapped_light_accumulates() {
        let mut rig = Rig::new(SoftwareBackend::new())
            .with_emitter(1, [-1.0, 0.0, 1.0], 2.0)
            .with_emitter(2, [1.5, 0.5, 1.0], 2.0);
        let config = PipelineConfig { normal_mapping_enabled: true, ambient_enabled: false, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        assert!(compositor.config().normal_mapping_enabled);
        let report = lit(rig.frame(&mut compositor, &viewer));
        assert_eq!(report.emitters, 2);
        let light = rig.buffer(&compositor, BufferId::LightSource);
        let normals = rig.buffer(&compositor, BufferId::Normals);
        assert!(normals.pixels.iter().all(|p| (p[2] - 1.0).abs() < 1e-6));
        // 32x32 small buffer, 0.25 world units per texel
        let under_first = light.get(12, 16)[0];
        let under_second = light.get(22, 14)[0];
        let far_corner = light.get(0, 31)[0];
        assert!(under_first > 0.1 && under_second > 0.1);
        assert!(far_corner < under_first);
    }

    #[test]
    fn isolation_is_disabled_for_caller_target_viewers() {
        let rig = Rig::new(SoftwareBackend::new());
        let viewer = ViewerState { renders_to_caller_target: true, ..viewer() };
        let config = PipelineConfig { isolate_to_this_viewer: true, ..base_config() };
        let compositor = rig.compositor(config, &viewer).unwrap();
        assert!(!compositor.config().isolate_to_this_viewer);
        assert!(compositor.diagnostics().iter().any(|d| d.kind == DiagnosticKind::IsolationDisabled));
    }

    #[test]
    fn isolated_viewer_keeps_earlier_content() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 3.0);
        let config = PipelineConfig { isolate_to_this_viewer: true, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        let isolated = compositor.isolation_target(&mut rig.backend, &viewer).unwrap().unwrap();
        // earlier viewer drew solid red; this viewer only covers the middle
        rig.backend.image_mut(rig.destination).unwrap().clear([1.0, 0.0, 0.0, 1.0]);
        rig.backend.insert(ExtractedObject::quad(1, [0.0; 3], [1.0, 1.0], [1.0; 4], VisibilityMask::SCENE));
        rig.backend
            .render_from(&viewer.view(), VisibilityMask::SCENE, isolated, ClearMode::TRANSPARENT, &ParameterBlock::new())
            .unwrap();
        let targets = FrameTargets { scene: isolated, destination: rig.destination };
        lit(compositor.render_frame(&mut rig.backend, &viewer, targets).unwrap());
        let out = rig.backend.image(rig.destination).unwrap();
        assert_eq!(out.get(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert!(out.get(16, 16)[1] > 0.0);
    }

    #[test]
    fn missing_composite_program_fails_setup() {
        let rig = Rig::new(SoftwareBackend::new().without_program(ShadingProgram::Composite));
        assert!(matches!(
            rig.compositor(base_config(), &viewer()),
            Err(SetupError::MissingProgram(ShadingProgram::Composite))
        ));
        let rig = Rig::new(SoftwareBackend::new());
        let bad = ViewerState { screen_size: (0, 32), ..viewer() };
        assert!(matches!(rig.compositor(base_config(), &bad), Err(SetupError::InvalidViewer(_))));
    }

    #[test]
    fn missing_optional_programs_downgrade() {
        let backend = SoftwareBackend::new()
            .without_program(ShadingProgram::BlurVertical)
            .without_program(ShadingProgram::ObstacleOpacity);
        let mut rig = Rig::new(backend).with_emitter(1, [0.0; 3], 2.0);
        let viewer = viewer();
        let mut compositor = rig.compositor(base_config(), &viewer).unwrap();
        assert!(!compositor.config().light_source_blur_enabled);
        assert!(!compositor.config().ambient_blur_enabled);
        let kinds: Vec<DiagnosticKind> = compositor.diagnostics().iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DiagnosticKind::ProgramUnavailable(ShadingProgram::BlurVertical)));
        assert!(kinds.contains(&DiagnosticKind::ProgramUnavailable(ShadingProgram::ObstacleOpacity)));
        lit(rig.frame(&mut compositor, &viewer));
    }

    #[test]
    fn unplannable_density_falls_back_to_unlit_scene() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 2.0);
        let config = PipelineConfig { light_pixel_density: 0.2, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        for _ in 0..2 {
            let outcome = rig.frame(&mut compositor, &viewer);
            assert!(matches!(outcome, FrameOutcome::Unlit(PlanError::DensityTooCoarse { .. })));
        }
        assert_eq!(compositor.diagnostics().len(), 1);
        assert_eq!(compositor.diagnostics()[0].kind, DiagnosticKind::DensityTooCoarse);
        assert_eq!(rig.backend.image(rig.scene), rig.backend.image(rig.destination));
        assert!(compositor.pool().is_empty());
    }

    #[test]
    fn disabled_compositor_copies_scene_and_keeps_extra_cycles() {
        let mut rig = Rig::new(SoftwareBackend::new());
        let viewer = viewer();
        let mut compositor = rig.compositor(base_config(), &viewer).unwrap();
        compositor.set_enabled(false);
        compositor.request_extra_ambient_cycles(3);
        assert_eq!(rig.frame(&mut compositor, &viewer), FrameOutcome::Inactive);
        assert_eq!(rig.backend.image(rig.scene), rig.backend.image(rig.destination));
        compositor.set_enabled(true);
        assert_eq!(lit(rig.frame(&mut compositor, &viewer)).ambient_steps, 4);
        assert_eq!(lit(rig.frame(&mut compositor, &viewer)).ambient_steps, 1);
    }

    #[test]
    fn preview_runtime_integrates_several_steps() {
        let mut rig = Rig::new(SoftwareBackend::new());
        let config = PipelineConfig { interactive_runtime: false, preview_ambient_cycles: 6, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        assert_eq!(lit(rig.frame(&mut compositor, &viewer)).ambient_steps, 6);
    }

    #[test]
    fn teleport_discards_ambient_history() {
        let mut rig = Rig::new(SoftwareBackend::new());
        let config = PipelineConfig { ambient_blur_enabled: false, ..base_config() };
        let mut viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        rig.frame(&mut compositor, &viewer);
        rig.frame(&mut compositor, &viewer);
        assert!(compositor.pool().is_valid(compositor.ambient_state().previous()));
        viewer.position[0] += 0.5;
        rig.frame(&mut compositor, &viewer);
        assert!(compositor.pool().is_valid(compositor.ambient_state().previous()));
        viewer.position[0] += 100.0;
        rig.frame(&mut compositor, &viewer);
        assert!(!compositor.pool().is_valid(compositor.ambient_state().previous()));
        assert!(compositor.pool().is_valid(compositor.ambient_state().current()));
    }

    #[test]
    fn buffer_affecting_config_change_reallocates() {
        let mut rig = Rig::new(SoftwareBackend::new());
        let viewer = viewer();
        let mut compositor = rig.compositor(base_config(), &viewer).unwrap();
        let before = lit(rig.frame(&mut compositor, &viewer));
        let denser = PipelineConfig { light_pixel_density: 8.0, ambient_enabled: false, ..base_config() };
        compositor.set_config(denser, &rig.backend, &viewer).unwrap();
        let after = lit(rig.frame(&mut compositor, &viewer));
        assert!(after.reallocated);
        assert_eq!(after.resolutions.small.width, before.resolutions.small.width * 2);
        assert!(compositor.pool().get(BufferId::AmbientA).is_none());
        compositor.release(&mut rig.backend);
        assert!(compositor.pool().is_empty());
        assert_eq!(rig.backend.target_count(), 2);
    }

    #[test]
    fn lit_scene_is_brighter_under_the_emitter() {
        let mut rig = Rig::new(SoftwareBackend::new()).with_emitter(1, [0.0; 3], 3.0);
        let config = PipelineConfig { ambient_enabled: false, ..base_config() };
        let viewer = viewer();
        let mut compositor = rig.compositor(config, &viewer).unwrap();
        lit(rig.frame(&mut compositor, &viewer));
        let out = rig.backend.image(rig.destination).unwrap();
        assert!(out.get(16, 16)[0] > 0.5);
        assert_eq!(out.get(0, 0)[0], 0.0);
        assert_eq!(out.get(0, 0)[3], 1.0);
    }
}
