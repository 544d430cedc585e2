//! Present pass: sample a lit screen target, tone map, render to the swapchain.

use crate::config::ToneMapping;
use crate::programs::{clamped_sampler, draw_fullscreen, fullscreen_pipeline, sampler_entry, texture_entry, uniform_entry};

const PRESENT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/present.wgsl"));

pub struct PresentPass {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    tone_mapping: ToneMapping,
    /// `mode` in the first lane; the rest pads to 16 bytes.
    tone: wgpu::Buffer,
}

impl PresentPass {
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat, tone_mapping: ToneMapping) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("penumbra_present"),
            source: wgpu::ShaderSource::Wgsl(PRESENT_SHADER.into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("penumbra_present"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2, 4, false)],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("penumbra_present"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline =
            fullscreen_pipeline(device, "penumbra_present", &module, &pipeline_layout, ("vs", "fs"), output_format, None);
        let tone = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("penumbra_present_tone"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            layout,
            sampler: clamped_sampler(device, "penumbra_present", wgpu::FilterMode::Linear),
            tone_mapping,
            tone,
        }
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping) {
        self.tone_mapping = tone_mapping;
    }

    /// Record the tone-mapped copy of `screen` into `output`.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        screen: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) {
        queue.write_buffer(&self.tone, 0, bytemuck::cast_slice(&[self.tone_mapping.mode(), 0, 0, 0]));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("penumbra_present"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(screen) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: self.tone.as_entire_binding() },
            ],
        });
        let clear = wgpu::LoadOp::Clear(wgpu::Color::BLACK);
        draw_fullscreen(encoder, "penumbra_present", output, clear, &self.pipeline, &bind_group);
    }
}
