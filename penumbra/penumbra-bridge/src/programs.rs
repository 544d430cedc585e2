//! GPU side of the shading programs: uniform layouts, blend states and
//! render pipelines for mesh draws and fullscreen blits.

use std::collections::HashMap;
use std::num::NonZeroU64;

use render_api::{BlendMode, ShadingProgram, VERTEX_STRIDE};

const MESH_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/mesh.wgsl"));
const BLIT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/blit.wgsl"));

/// Stride between per-draw uniforms in one dynamic-offset buffer.
pub const UNIFORM_STRIDE: u64 = 256;

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Per-draw uniform of `mesh.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshUniform {
    pub view_proj: [f32; 16],
    pub model: [f32; 16],
    pub color: [f32; 4],
    /// Object normal in `xyz`.
    pub normal: [f32; 4],
    pub light_origin: [f32; 4],
    pub light_end: [f32; 4],
    /// Light geometry: segment end relative to the origin in `xy`, radius in `z`.
    pub light_shape: [f32; 4],
    pub extended_to_small: [f32; 2],
    /// Target size in pixels.
    pub viewport: [f32; 2],
    pub has_obstacles: u32,
    pub has_normals: u32,
    pub _pad: [u32; 2],
}

/// Per-blit uniform of `blit.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlitUniform {
    pub uv_scale: [f32; 2],
    pub uv_offset: [f32; 2],
    pub extended_to_small: [f32; 2],
    pub ambient_shift: [f32; 2],
    pub source_size: [f32; 2],
    pub blur_step: f32,
    pub persistence: f32,
    /// One flag per auxiliary texture binding.
    pub has_aux: [u32; 2],
    pub _pad: [u32; 2],
}

/// Fragment routine used for a mesh draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshShader {
    /// Object material: flat colour, alpha blended.
    Flat,
    /// Emitter light geometry: falloff from its point or segment times obstacle transmittance.
    Light,
    ObstacleOpacity,
    Normals,
    NormalLight,
}

impl MeshShader {
    /// Shader for `program` applied to an object; `None` means the object's own material.
    pub fn select(program: Option<ShadingProgram>, is_emitter: bool) -> Option<MeshShader> {
        match program {
            None if is_emitter => Some(MeshShader::Light),
            None => Some(MeshShader::Flat),
            Some(ShadingProgram::ObstacleOpacity) => Some(MeshShader::ObstacleOpacity),
            Some(ShadingProgram::NormalBuffer) => Some(MeshShader::Normals),
            Some(ShadingProgram::NormalMappedLight) => Some(MeshShader::NormalLight),
            Some(_) => None,
        }
    }

    fn entry_point(self) -> &'static str {
        match self {
            MeshShader::Flat => "fs_flat",
            MeshShader::Light => "fs_light",
            MeshShader::ObstacleOpacity => "fs_obstacle_opacity",
            MeshShader::Normals => "fs_normals",
            MeshShader::NormalLight => "fs_normal_light",
        }
    }

    pub fn blend(self) -> BlendMode {
        match self {
            MeshShader::Flat | MeshShader::ObstacleOpacity => BlendMode::AlphaOver,
            MeshShader::Light => BlendMode::Additive,
            MeshShader::Normals | MeshShader::NormalLight => BlendMode::Replace,
        }
    }
}

/// Fragment entry point of a fullscreen program; `None` is a plain copy.
pub fn blit_entry_point(program: Option<ShadingProgram>) -> Option<&'static str> {
    match program {
        None => Some("fs_copy"),
        Some(ShadingProgram::AlphaOver) => Some("fs_alpha_over"),
        Some(ShadingProgram::ObstacleDownsample) => Some("fs_downsample"),
        Some(ShadingProgram::BlurHorizontal) => Some("fs_blur_h"),
        Some(ShadingProgram::BlurVertical) => Some("fs_blur_v"),
        Some(ShadingProgram::LightBlend) => Some("fs_light_blend"),
        Some(ShadingProgram::AmbientIntegrate) => Some("fs_ambient"),
        Some(ShadingProgram::Composite) => Some("fs_composite"),
        Some(_) => None,
    }
}

pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Replace => None,
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState { color: add, alpha: add })
        }
        BlendMode::AlphaOver => Some(wgpu::BlendState::ALPHA_BLENDING),
    }
}

pub(crate) fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32, size: usize, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

/// Clamp-to-edge sampler reading with `filter`.
pub(crate) fn clamped_sampler(device: &wgpu::Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Pipeline for one fullscreen triangle; no vertex buffers.
pub(crate) fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    (vs, fs): (&str, &str),
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState { module, entry_point: Some(vs), buffers: &[], compilation_options: Default::default() },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fs),
            targets: &[Some(wgpu::ColorTargetState { format, blend, write_mask: wgpu::ColorWrites::ALL })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Record one fullscreen triangle into `view`.
pub(crate) fn draw_fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    rp.set_pipeline(pipeline);
    rp.set_bind_group(0, bind_group, &[]);
    rp.draw(0..3, 0..1);
}

/// Shader modules, layouts and a lazily filled pipeline cache.
pub struct Programs {
    mesh_shader: wgpu::ShaderModule,
    blit_shader: wgpu::ShaderModule,
    pub mesh_layout: wgpu::BindGroupLayout,
    pub blit_layout: wgpu::BindGroupLayout,
    mesh_pipeline_layout: wgpu::PipelineLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    mesh_pipelines: HashMap<(MeshShader, wgpu::TextureFormat), wgpu::RenderPipeline>,
    blit_pipelines: HashMap<(Option<ShadingProgram>, wgpu::TextureFormat), wgpu::RenderPipeline>,
}

impl Programs {
    pub fn new(device: &wgpu::Device) -> Self {
        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("penumbra_mesh_shader"),
            source: wgpu::ShaderSource::Wgsl(MESH_SHADER.into()),
        });
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("penumbra_blit_shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });
        // obstacle texture + sampler, normal texture + sampler
        let mesh_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("penumbra_mesh_bind_group_layout"),
            entries: &[
                uniform_entry(0, std::mem::size_of::<MeshUniform>(), true),
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
            ],
        });
        // source, then the program's auxiliary textures in `texture_inputs` order
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("penumbra_blit_bind_group_layout"),
            entries: &[
                uniform_entry(0, std::mem::size_of::<BlitUniform>(), false),
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
                texture_entry(5),
                sampler_entry(6),
            ],
        });
        let mesh_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("penumbra_mesh_pipeline_layout"),
            bind_group_layouts: &[&mesh_layout],
            push_constant_ranges: &[],
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("penumbra_blit_pipeline_layout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });
        Self {
            mesh_shader,
            blit_shader,
            mesh_layout,
            blit_layout,
            mesh_pipeline_layout,
            blit_pipeline_layout,
            mesh_pipelines: HashMap::new(),
            blit_pipelines: HashMap::new(),
        }
    }

    pub fn mesh_pipeline(&self, shader: MeshShader, format: wgpu::TextureFormat) -> Option<&wgpu::RenderPipeline> {
        self.mesh_pipelines.get(&(shader, format))
    }

    pub fn blit_pipeline(
        &self,
        program: Option<ShadingProgram>,
        format: wgpu::TextureFormat,
    ) -> Option<&wgpu::RenderPipeline> {
        self.blit_pipelines.get(&(program, format))
    }

    pub fn ensure_mesh_pipeline(&mut self, device: &wgpu::Device, shader: MeshShader, format: wgpu::TextureFormat) {
        let module = &self.mesh_shader;
        let layout = &self.mesh_pipeline_layout;
        self.mesh_pipelines.entry((shader, format)).or_insert_with(|| {
            log::debug!("penumbra bridge: building mesh pipeline {shader:?} for {format:?}");
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(shader.entry_point()),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_mesh"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: VERTEX_STRIDE as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &MESH_ATTRIBUTES,
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(shader.entry_point()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: blend_state(shader.blend()),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });
    }

    /// `entry_point` is `blit_entry_point(program)`, already resolved by the caller.
    pub fn ensure_blit_pipeline(
        &mut self,
        device: &wgpu::Device,
        program: Option<ShadingProgram>,
        entry_point: &'static str,
        format: wgpu::TextureFormat,
    ) {
        let module = &self.blit_shader;
        let layout = &self.blit_pipeline_layout;
        let blend = program.map(ShadingProgram::blend).unwrap_or(BlendMode::Replace);
        self.blit_pipelines.entry((program, format)).or_insert_with(|| {
            log::debug!("penumbra bridge: building blit pipeline {entry_point} for {format:?}");
            fullscreen_pipeline(device, entry_point, module, layout, ("vs_fullscreen", entry_point), format, blend_state(blend))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_fit_wgsl_layout() {
        assert_eq!(std::mem::size_of::<MeshUniform>(), 240);
        assert_eq!(std::mem::size_of::<BlitUniform>(), 64);
        assert!(std::mem::size_of::<MeshUniform>() as u64 <= UNIFORM_STRIDE);
    }

    #[test]
    fn every_program_has_a_gpu_routine() {
        for program in ShadingProgram::ALL {
            let fullscreen = blit_entry_point(Some(program)).is_some();
            let draw = MeshShader::select(Some(program), false).is_some();
            assert!(fullscreen != draw, "{}", program.label());
            assert_eq!(fullscreen, program.is_fullscreen());
        }
    }

    #[test]
    fn blend_modes_match_program_declarations() {
        assert!(blend_state(BlendMode::Replace).is_none());
        assert_eq!(blend_state(BlendMode::AlphaOver), Some(wgpu::BlendState::ALPHA_BLENDING));
        let additive = blend_state(BlendMode::Additive).map(|b| b.color.dst_factor);
        assert_eq!(additive, Some(wgpu::BlendFactor::One));
        assert_eq!(MeshShader::select(None, true), Some(MeshShader::Light));
        assert_eq!(MeshShader::Light.blend(), BlendMode::Additive);
        assert_eq!(MeshShader::ObstacleOpacity.blend(), ShadingProgram::ObstacleOpacity.blend());
    }
}
