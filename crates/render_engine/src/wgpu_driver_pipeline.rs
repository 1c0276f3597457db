//! Pipeline, bind group layout and GPU-side structs for the draw program.

use std::collections::HashMap;

use render_protocol::IDENTITY_MATRIX;

use crate::{BlendFactor, BlendFunc, DrawDescription};

const FLAG_TEXTURE: u32 = 1;
const FLAG_MASK: u32 = 2;
const FLAG_PREMULTIPLIED: u32 = 4;
const FLAG_OPAQUE: u32 = 8;
const FLAG_COLOR_MATRIX: u32 = 16;
const FLAG_FLIP_TEXTURE_V: u32 = 32;
const FLAG_FLIP_MASK_V: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct VertexGpu {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct DrawUniformGpu {
    projection: [f32; 16],
    texture_matrix: [f32; 16],
    color_matrix: [f32; 16],
    color: [f32; 4],
    plane_alpha: f32,
    mask_threshold: f32,
    flags: u32,
    _padding: u32,
}

impl DrawUniformGpu {
    /// `flip_*` mark sources that were rendered by this driver: their rows are
    /// stored top-down while texture coordinates address them bottom-up.
    pub(crate) fn new(description: &DrawDescription, flip_texture: bool, flip_mask: bool) -> Self {
        let mut flags = 0;
        let mut set = |flag: u32, enabled: bool| {
            if enabled {
                flags |= flag;
            }
        };
        set(FLAG_TEXTURE, description.texture.is_some());
        set(FLAG_MASK, description.mask.is_some());
        set(FLAG_PREMULTIPLIED, description.premultiplied_alpha);
        set(FLAG_OPAQUE, description.opaque);
        set(FLAG_COLOR_MATRIX, description.color_matrix.is_some());
        set(FLAG_FLIP_TEXTURE_V, flip_texture);
        set(FLAG_FLIP_MASK_V, flip_mask);

        Self {
            projection: description.projection,
            texture_matrix: description
                .texture
                .map_or(IDENTITY_MATRIX, |texture| texture.texture_matrix),
            color_matrix: description.color_matrix.unwrap_or(IDENTITY_MATRIX),
            color: description.color,
            plane_alpha: description.plane_alpha,
            mask_threshold: description.mask.map_or(0.0, |mask| mask.alpha_threshold),
            flags,
            _padding: 0,
        }
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    }
}

pub(crate) fn blend_state(blend: BlendFunc) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(blend.src),
        dst_factor: blend_factor(blend.dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

pub(crate) fn create_draw_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("render_engine.draw_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            texture_entry(1),
            sampler_entry(2),
            texture_entry(3),
            sampler_entry(4),
        ],
    })
}

/// Draw pipelines keyed by blend function and target format, built on first use.
pub(crate) struct DrawPipelines {
    shader: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<(Option<BlendFunc>, wgpu::TextureFormat), wgpu::RenderPipeline>,
}

impl DrawPipelines {
    pub(crate) fn new(device: &wgpu::Device, bind_group_layout: &wgpu::BindGroupLayout) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("render_engine.draw_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("render_engine.wgsl").into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("render_engine.draw_pipeline_layout"),
            bind_group_layouts: &[bind_group_layout],
            immediate_size: 0,
        });
        Self {
            shader,
            layout,
            pipelines: HashMap::new(),
        }
    }

    pub(crate) fn get(
        &mut self,
        device: &wgpu::Device,
        blend: Option<BlendFunc>,
        format: wgpu::TextureFormat,
    ) -> &wgpu::RenderPipeline {
        let Self {
            shader,
            layout,
            pipelines,
        } = self;
        pipelines
            .entry((blend, format))
            .or_insert_with(|| create_draw_pipeline(device, layout, shader, format, blend))
    }

    pub(crate) fn len(&self) -> usize {
        self.pipelines.len()
    }
}

fn create_draw_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    blend: Option<BlendFunc>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("render_engine.draw_pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<VertexGpu>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &VERTEX_ATTRIBUTES,
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: blend.map(blend_state),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}
