//! wgpu lighting backend: owns the device, queue, render targets and the
//! tagged mesh cache; every contract call encodes and submits its own work.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::Arc;

use render_api::{
    BackendError, ClearMode, EmitterId, ExtractedScene, FilterMode, LightingBackend, ParamName, ParameterBlock,
    PixelFormat, ShadingProgram, TargetDesc, TargetId, ViewSetup, VisibilityMask,
};
use wgpu::util::DeviceExt;

use crate::config::texture_format;
use crate::programs::{
    blit_entry_point, clamped_sampler, draw_fullscreen, BlitUniform, MeshShader, MeshUniform, Programs, UNIFORM_STRIDE,
};

/// A render target living on the GPU.
pub struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TargetDesc,
}

impl GpuTarget {
    fn new(device: &wgpu::Device, desc: &TargetDesc) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, desc: *desc }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }
}

/// Cached GPU buffers for one extracted object.
struct CachedMesh {
    vertex_buf: Arc<wgpu::Buffer>,
    index_buf: Arc<wgpu::Buffer>,
    index_count: u32,
    vertex_len: usize,
    index_len: usize,
}

/// Per-draw state resolved before encoding.
struct MeshDraw {
    entity_id: u64,
    shader: MeshShader,
}

pub struct WgpuLightingBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: Programs,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,
    /// Bound in place of absent textures.
    fallback: GpuTarget,
    blit_uniform_buf: wgpu::Buffer,
    targets: HashMap<TargetId, GpuTarget>,
    next_id: u64,
    scene: ExtractedScene,
    /// Cache by entity_id. Updated in prepare().
    mesh_cache: HashMap<u64, CachedMesh>,
}

impl WgpuLightingBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let programs = Programs::new(&device);
        let nearest = clamped_sampler(&device, "penumbra_nearest_sampler", wgpu::FilterMode::Nearest);
        let linear = clamped_sampler(&device, "penumbra_linear_sampler", wgpu::FilterMode::Linear);
        let fallback = GpuTarget::new(
            &device,
            &TargetDesc {
                label: "penumbra_fallback_texture",
                width: 1,
                height: 1,
                format: PixelFormat::Standard,
                filter: FilterMode::Nearest,
            },
        );
        let blit_uniform_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("penumbra_blit_uniform"),
            size: std::mem::size_of::<BlitUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device,
            queue,
            programs,
            nearest,
            linear,
            fallback,
            blit_uniform_buf,
            targets: HashMap::new(),
            next_id: 1,
            scene: ExtractedScene::new(),
            mesh_cache: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn target(&self, id: TargetId) -> Option<&GpuTarget> {
        self.targets.get(&id)
    }

    /// Upload this frame's extracted objects. Buffers of unchanged size are
    /// rewritten in place; objects no longer extracted are dropped.
    pub fn prepare(&mut self, scene: &ExtractedScene) {
        let current: HashSet<u64> = scene.objects.keys().copied().collect();
        self.mesh_cache.retain(|k, _| current.contains(k));
        for (&entity_id, object) in &scene.objects {
            if !object.visible || object.vertex_data.is_empty() || object.index_data.is_empty() {
                continue;
            }
            let vertex_len = object.vertex_data.len();
            let index_len = object.index_data.len();
            if let Some(cached) = self.mesh_cache.get_mut(&entity_id) {
                if cached.vertex_len == vertex_len && cached.index_len == index_len {
                    self.queue.write_buffer(&cached.vertex_buf, 0, &object.vertex_data);
                    self.queue.write_buffer(&cached.index_buf, 0, &object.index_data);
                    continue;
                }
            }
            let vertex_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("penumbra_mesh_vertex"),
                contents: &object.vertex_data,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
            let index_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("penumbra_mesh_index"),
                contents: &object.index_data,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            });
            self.mesh_cache.insert(
                entity_id,
                CachedMesh {
                    vertex_buf: Arc::new(vertex_buf),
                    index_buf: Arc::new(index_buf),
                    index_count: (index_len / 4) as u32,
                    vertex_len,
                    index_len,
                },
            );
        }
        self.scene = scene.clone();
    }

    /// Read a target back as tightly packed RGBA8, HDR values clamped to `[0, 1]`.
    pub fn read_rgba8(&self, id: TargetId) -> Result<(u32, u32, Vec<u8>), BackendError> {
        let target = self.get(id)?;
        let (width, height) = target.size();
        let texel_bytes = match target.format() {
            PixelFormat::Standard => 4,
            PixelFormat::Hdr => 8,
        };
        let row_bytes = width * texel_bytes;
        let padded_row = padded_bytes_per_row(row_bytes);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("penumbra_readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("penumbra_readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: target.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit([encoder.finish()]);

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::Device(e.to_string()))?
            .map_err(|e| BackendError::Device(e.to_string()))?;

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize).take(height as usize) {
                let row = &row[..row_bytes as usize];
                match target.format() {
                    PixelFormat::Standard => pixels.extend_from_slice(row),
                    PixelFormat::Hdr => {
                        for half in row.chunks_exact(2) {
                            let v = half_to_f32(u16::from_le_bytes([half[0], half[1]]));
                            pixels.push((v.clamp(0.0, 1.0) * 255.0).round() as u8);
                        }
                    }
                }
            }
        }
        readback.unmap();
        Ok((width, height, pixels))
    }

    fn get(&self, id: TargetId) -> Result<&GpuTarget, BackendError> {
        self.targets.get(&id).ok_or(BackendError::UnknownTarget(id))
    }

    fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Nearest => &self.nearest,
            FilterMode::Bilinear => &self.linear,
        }
    }

    /// Texture bound to `name`, or `None` when unset, unknown, or the target being written.
    fn bound(&self, params: &ParameterBlock, name: ParamName, writing: TargetId) -> Option<&GpuTarget> {
        params
            .texture(name)
            .filter(|&t| t != writing)
            .and_then(|t| self.targets.get(&t))
    }

    fn texture_or_fallback<'a>(&'a self, bound: Option<&'a GpuTarget>) -> (&'a wgpu::TextureView, &'a wgpu::Sampler) {
        match bound {
            Some(t) => (t.view(), self.sampler(t.desc.filter)),
            None => (self.fallback.view(), &self.nearest),
        }
    }

    fn draw(
        &mut self,
        view: &ViewSetup,
        entity_ids: Vec<u64>,
        program: Option<ShadingProgram>,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        let (width, height, format) = {
            let dest = self.get(target)?;
            (dest.desc.width, dest.desc.height, texture_format(dest.desc.format))
        };
        let mut draws = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            let Some(object) = self.scene.objects.get(&entity_id) else { continue };
            let shader = MeshShader::select(program, object.emitter.is_some()).ok_or_else(|| {
                BackendError::Device(format!("`{}` is not a draw override", program.map_or("none", ShadingProgram::label)))
            })?;
            if self.mesh_cache.contains_key(&entity_id) {
                draws.push(MeshDraw { entity_id, shader });
            }
        }
        for d in &draws {
            self.programs.ensure_mesh_pipeline(&self.device, d.shader, format);
        }

        let obstacles = self.bound(params, ParamName::ObstacleTexture, target);
        let normals = self.bound(params, ParamName::NormalTexture, target);
        let view_proj = view.view_proj();
        let extended_to_small = params.vec2(ParamName::ExtendedToSmallScale).unwrap_or([1.0, 1.0]);
        let mut uniform_bytes = vec![0u8; (draws.len().max(1) as u64 * UNIFORM_STRIDE) as usize];
        for (i, d) in draws.iter().enumerate() {
            let Some(object) = self.scene.objects.get(&d.entity_id) else { continue };
            let [ox, oy, oz] = object.origin();
            let light_origin = params.vec4(ParamName::LightOrigin).unwrap_or([ox, oy, oz, 0.0]);
            let [nx, ny, nz] = object.normal;
            let uniform = MeshUniform {
                view_proj,
                model: object.transform,
                color: object.color,
                normal: [nx, ny, nz, 0.0],
                light_origin,
                light_end: params.vec4(ParamName::LightSegmentEnd).unwrap_or(light_origin),
                light_shape: [object.light_segment[0], object.light_segment[1], object.light_radius, 0.0],
                extended_to_small,
                viewport: [width as f32, height as f32],
                has_obstacles: u32::from(obstacles.is_some()),
                has_normals: u32::from(normals.is_some()),
                _pad: [0; 2],
            };
            let offset = i * UNIFORM_STRIDE as usize;
            uniform_bytes[offset..offset + std::mem::size_of::<MeshUniform>()]
                .copy_from_slice(bytemuck::bytes_of(&uniform));
        }
        let uniform_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("penumbra_mesh_uniforms"),
            contents: &uniform_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let (obstacle_view, obstacle_sampler) = self.texture_or_fallback(obstacles);
        let (normal_view, normal_sampler) = self.texture_or_fallback(normals);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("penumbra_mesh_bind_group"),
            layout: &self.programs.mesh_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniform_buf,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<MeshUniform>() as u64),
                    }),
                },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(obstacle_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(obstacle_sampler) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(normal_view) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(normal_sampler) },
            ],
        });

        let dest = self.get(target)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("penumbra_draw") });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(dest.desc.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dest.view(),
                    resolve_target: None,
                    ops: wgpu::Operations { load: load_op(clear), store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for (i, d) in draws.iter().enumerate() {
                let (Some(pipeline), Some(mesh)) =
                    (self.programs.mesh_pipeline(d.shader, format), self.mesh_cache.get(&d.entity_id))
                else {
                    continue;
                };
                rp.set_pipeline(pipeline);
                rp.set_bind_group(0, &bind_group, &[(i as u64 * UNIFORM_STRIDE) as u32]);
                rp.set_vertex_buffer(0, mesh.vertex_buf.slice(..));
                rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rp.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
        self.queue.submit([encoder.finish()]);
        Ok(())
    }
}

fn load_op(clear: ClearMode) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        ClearMode::Color([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(r),
            g: f64::from(g),
            b: f64::from(b),
            a: f64::from(a),
        }),
        ClearMode::Keep => wgpu::LoadOp::Load,
    }
}

fn padded_bytes_per_row(row_bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    row_bytes.div_ceil(align) * align
}

/// IEEE 754 binary16 to f32.
fn half_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x3ff);
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        31 if mantissa == 0.0 => sign * f32::INFINITY,
        31 => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

impl LightingBackend for WgpuLightingBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::InvalidSize { width: desc.width, height: desc.height });
        }
        let id = TargetId(self.next_id);
        self.next_id += 1;
        log::debug!("penumbra bridge: target {:?} `{}` {}x{}", id, desc.label, desc.width, desc.height);
        self.targets.insert(id, GpuTarget::new(&self.device, desc));
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        if let Some(t) = self.targets.remove(&target) {
            t.texture.destroy();
        }
    }

    fn set_filter_mode(&mut self, target: TargetId, filter: FilterMode) -> Result<(), BackendError> {
        let t = self.targets.get_mut(&target).ok_or(BackendError::UnknownTarget(target))?;
        t.desc.filter = filter;
        Ok(())
    }

    fn filter_mode(&self, target: TargetId) -> Option<FilterMode> {
        self.targets.get(&target).map(|t| t.desc.filter)
    }

    fn has_program(&self, program: ShadingProgram) -> bool {
        blit_entry_point(Some(program)).is_some() || MeshShader::select(Some(program), false).is_some()
    }

    fn render_from(
        &mut self,
        view: &ViewSetup,
        mask: VisibilityMask,
        target: TargetId,
        clear: ClearMode,
        params: &ParameterBlock,
    ) -> Result<(), BackendError> {
        let ids = self.scene.matching(mask).iter().map(|o| o.entity_id).collect();
        self.draw(view, ids, None, target, clear, params)
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
        let ids = self.scene.matching(mask).iter().map(|o| o.entity_id).collect();
        self.draw(view, ids, Some(program), target, clear, params)
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
        let ids = self.scene.emitter_geometry(emitter).iter().map(|o| o.entity_id).collect();
        self.draw(view, ids, program, target, clear, params)
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
        let entry_point = blit_entry_point(program).ok_or_else(|| {
            BackendError::Device(format!(
                "`{}` is not a fullscreen program",
                program.map_or("none", ShadingProgram::label)
            ))
        })?;
        let (src_size, format) = {
            let src = self.get(source)?;
            let dst = self.get(destination)?;
            (src.size(), texture_format(dst.desc.format))
        };
        self.programs.ensure_blit_pipeline(&self.device, program, entry_point, format);

        let inputs = program.map_or(&[][..], ShadingProgram::texture_inputs);
        let aux: Vec<Option<&GpuTarget>> = (0..2)
            .map(|i| inputs.get(i).and_then(|&name| self.bound(params, name, destination)))
            .collect();
        let uniform = BlitUniform {
            uv_scale: params.vec2(ParamName::CompositeUvScale).unwrap_or([1.0, 1.0]),
            uv_offset: params.vec2(ParamName::CompositeUvOffset).unwrap_or([0.0, 0.0]),
            extended_to_small: params.vec2(ParamName::ExtendedToSmallScale).unwrap_or([1.0, 1.0]),
            ambient_shift: params.vec2(ParamName::AmbientShift).unwrap_or([0.0, 0.0]),
            source_size: [src_size.0 as f32, src_size.1 as f32],
            blur_step: params.float(ParamName::BlurStep).unwrap_or(1.0),
            persistence: params.float(ParamName::AmbientPersistence).unwrap_or(0.9),
            has_aux: [u32::from(aux[0].is_some()), u32::from(aux[1].is_some())],
            _pad: [0; 2],
        };
        self.queue.write_buffer(&self.blit_uniform_buf, 0, bytemuck::bytes_of(&uniform));

        let src = self.get(source)?;
        let dst = self.get(destination)?;
        let (aux0_view, aux0_sampler) = self.texture_or_fallback(aux[0]);
        let (aux1_view, aux1_sampler) = self.texture_or_fallback(aux[1]);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("penumbra_blit_bind_group"),
            layout: &self.programs.blit_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.blit_uniform_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(src.view()) },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler(src.desc.filter)),
                },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(aux0_view) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(aux0_sampler) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(aux1_view) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::Sampler(aux1_sampler) },
            ],
        });
        let pipeline = self
            .programs
            .blit_pipeline(program, format)
            .ok_or_else(|| BackendError::Device(format!("no pipeline for `{entry_point}`")))?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("penumbra_blit") });
        draw_fullscreen(&mut encoder, entry_point, dst.view(), wgpu::LoadOp::Load, pipeline, &bind_group);
        self.queue.submit([encoder.finish()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(1280), 1280);
        assert_eq!(padded_bytes_per_row(1284), 1536);
    }

    #[test]
    fn half_floats_decode() {
        assert_eq!(half_to_f32(0x3c00), 1.0);
        assert_eq!(half_to_f32(0xc000), -2.0);
        assert_eq!(half_to_f32(0x3800), 0.5);
        assert_eq!(half_to_f32(0x0000), 0.0);
        assert_eq!(half_to_f32(0x7c00), f32::INFINITY);
        assert!((half_to_f32(0x0001) - 5.960_464_5e-8).abs() < 1e-12);
    }

    #[test]
    fn clear_modes_map_to_load_ops() {
        assert_eq!(load_op(ClearMode::Keep), wgpu::LoadOp::Load);
        assert_eq!(load_op(ClearMode::TRANSPARENT), wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
    }
}
