//! `GpuDriver` on wgpu.
//!
//! Every draw, clear and readback is recorded into its own encoder and
//! submitted immediately, which keeps the GL-style immediate semantics the
//! engine expects. Rendered textures store rows top-down; the draw program
//! flips them back when sampling.

use render_protocol::{
    ExternalImageHandle, FramebufferHandle, IDENTITY_MATRIX, Mesh, Rect, Texture, TextureHandle,
};
use slotmap::SlotMap;
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use crate::driver::expected_rgba8_len;
use crate::wgpu_driver_pipeline::{
    DrawPipelines, DrawUniformGpu, VertexGpu, create_draw_bind_group_layout,
};
use crate::{
    BlendFunc, DrawDescription, DriverError, DriverLimits, FramebufferStatus, GpuDriver,
    IncompleteReason, RenderTarget, TextureDescriptor,
};

const INTERNAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const CLIP_SPACE_QUAD: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
];

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Content comes from render passes rather than uploads.
    rendered: bool,
    external: Option<ExternalImageHandle>,
}

struct WgpuFramebuffer {
    attachment: TextureHandle,
}

/// A resolved color attachment for one pass.
struct BoundTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuDriver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: DriverLimits,
    textures: SlotMap<TextureHandle, WgpuTexture>,
    framebuffers: SlotMap<FramebufferHandle, WgpuFramebuffer>,
    external_images: SlotMap<ExternalImageHandle, wgpu::Texture>,
    default_target: Option<wgpu::Texture>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: DrawPipelines,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
    placeholder_view: wgpu::TextureView,
    bound: RenderTarget,
    viewport: (u32, u32),
    scissor: Option<Rect>,
    blend: Option<BlendFunc>,
}

impl WgpuDriver {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let max_dimension = device.limits().max_texture_dimension_2d;
        let bind_group_layout = create_draw_bind_group_layout(&device);
        let pipelines = DrawPipelines::new(&device, &bind_group_layout);
        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("render_engine.sampler.linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("render_engine.sampler.nearest"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let placeholder = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("render_engine.placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: INTERNAL_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        debug!(max_dimension, "wgpu driver created");
        Self {
            device,
            queue,
            limits: DriverLimits {
                max_texture_size: max_dimension,
                max_viewport_dims: (max_dimension, max_dimension),
            },
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            external_images: SlotMap::with_key(),
            default_target: None,
            bind_group_layout,
            pipelines,
            sampler_linear,
            sampler_nearest,
            placeholder_view,
            bound: RenderTarget::Default,
            viewport: (0, 0),
            scissor: None,
            blend: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Texture drawn to while `RenderTarget::Default` is bound, typically the
    /// current surface texture.
    pub fn set_default_target(&mut self, texture: Option<wgpu::Texture>) {
        self.default_target = texture;
    }

    /// Makes a caller-owned texture available to `bind_image_as_framebuffer`.
    /// It is attachable when created with `RENDER_ATTACHMENT` usage.
    pub fn register_external_image(&mut self, texture: wgpu::Texture) -> ExternalImageHandle {
        self.external_images.insert(texture)
    }

    pub fn unregister_external_image(
        &mut self,
        image: ExternalImageHandle,
    ) -> Option<wgpu::Texture> {
        self.external_images.remove(image)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn bound_target(&self) -> Result<BoundTarget, DriverError> {
        match self.bound {
            RenderTarget::Default => {
                let texture = self
                    .default_target
                    .clone()
                    .ok_or(DriverError::NoDefaultTarget)?;
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(BoundTarget { texture, view })
            }
            RenderTarget::Framebuffer(framebuffer) => {
                if let FramebufferStatus::Incomplete(reason) = self.framebuffer_status(framebuffer)
                {
                    return Err(DriverError::IncompleteTarget(reason));
                }
                let attachment = self
                    .framebuffers
                    .get(framebuffer)
                    .and_then(|framebuffer| self.textures.get(framebuffer.attachment))
                    .ok_or(DriverError::UnknownFramebuffer(framebuffer))?;
                Ok(BoundTarget {
                    texture: attachment.texture.clone(),
                    view: attachment.view.clone(),
                })
            }
        }
    }

    fn mark_bound_rendered(&mut self) {
        if let RenderTarget::Framebuffer(framebuffer) = self.bound {
            let attachment = self.framebuffers.get(framebuffer).map(|fb| fb.attachment);
            if let Some(texture) = attachment.and_then(|handle| self.textures.get_mut(handle)) {
                texture.rendered = true;
            }
        }
    }

    fn sampled(&self, texture: &Texture) -> Result<(&wgpu::TextureView, bool), DriverError> {
        let entry = self
            .textures
            .get(texture.handle)
            .ok_or(DriverError::UnknownTexture(texture.handle))?;
        Ok((&entry.view, entry.rendered))
    }

    fn sampler(&self, filtering: bool) -> &wgpu::Sampler {
        if filtering {
            &self.sampler_linear
        } else {
            &self.sampler_nearest
        }
    }

    fn encode_draw(
        &mut self,
        target: &BoundTarget,
        vertices: &[VertexGpu],
        description: &DrawDescription,
        blend: Option<BlendFunc>,
        scissor: Option<Rect>,
    ) -> Result<(), DriverError> {
        let target_width = target.texture.width();
        let target_height = target.texture.height();
        let scissor = match scissor {
            Some(scissor) => {
                let clamped = scissor.clamp_to_size(target_width, target_height);
                if clamped.is_empty() {
                    return Ok(());
                }
                Some(clamped)
            }
            None => None,
        };

        let (source_view, flip_texture) = match description.texture.as_ref() {
            Some(texture) => self.sampled(texture)?,
            None => (&self.placeholder_view, false),
        };
        let (mask_view, flip_mask) = match description.mask.as_ref() {
            Some(mask) => self.sampled(&mask.texture)?,
            None => (&self.placeholder_view, false),
        };
        let source_sampler = self.sampler(
            description
                .texture
                .is_some_and(|texture| texture.filtering),
        );
        let mask_sampler = self.sampler(false);

        let uniform = DrawUniformGpu::new(description, flip_texture, flip_mask);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("render_engine.draw_uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("render_engine.draw_vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("render_engine.draw_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(source_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(mask_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(mask_sampler),
                },
            ],
        });

        let pipeline = self
            .pipelines
            .get(&self.device, blend, target.texture.format())
            .clone();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("render_engine.draw_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render_engine.draw_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            // Viewport origin is bottom-left of the target.
            let (viewport_width, viewport_height) = match self.viewport {
                (0, _) | (_, 0) => (target_width, target_height),
                (width, height) => (width.min(target_width), height.min(target_height)),
            };
            pass.set_viewport(
                0.0,
                (target_height - viewport_height) as f32,
                viewport_width as f32,
                viewport_height as f32,
                0.0,
                1.0,
            );
            if let Some(scissor) = scissor {
                pass.set_scissor_rect(
                    scissor.left as u32,
                    scissor.top as u32,
                    scissor.width() as u32,
                    scissor.height() as u32,
                );
            }
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl GpuDriver for WgpuDriver {
    fn limits(&self) -> DriverLimits {
        self.limits
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, DriverError> {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if descriptor.renderable {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(descriptor.label),
            size: wgpu::Extent3d {
                width: descriptor.width.max(1),
                height: descriptor.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: INTERNAL_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(WgpuTexture {
            texture,
            view,
            rendered: false,
            external: None,
        }))
    }

    fn upload_texture(&mut self, texture: TextureHandle, pixels: &[u8]) -> Result<(), DriverError> {
        let entry = self
            .textures
            .get_mut(texture)
            .ok_or(DriverError::UnknownTexture(texture))?;
        let (width, height) = (entry.texture.width(), entry.texture.height());
        let expected = expected_rgba8_len(width, height);
        if pixels.len() != expected {
            return Err(DriverError::PixelDataLength {
                expected,
                actual: pixels.len(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        entry.rendered = false;
        Ok(())
    }

    fn import_external_image(
        &mut self,
        image: ExternalImageHandle,
    ) -> Result<Texture, DriverError> {
        let texture = self
            .external_images
            .get(image)
            .cloned()
            .ok_or(DriverError::UnknownExternalImage(image))?;
        let (width, height) = (texture.width(), texture.height());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = self.textures.insert(WgpuTexture {
            texture,
            view,
            rendered: false,
            external: Some(image),
        });
        Ok(Texture::new_external(handle, width, height))
    }

    fn create_framebuffer(
        &mut self,
        color_attachment: TextureHandle,
    ) -> Result<FramebufferHandle, DriverError> {
        if !self.textures.contains_key(color_attachment) {
            return Err(DriverError::UnknownTexture(color_attachment));
        }
        Ok(self.framebuffers.insert(WgpuFramebuffer {
            attachment: color_attachment,
        }))
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(attachment) = self
            .framebuffers
            .get(framebuffer)
            .and_then(|framebuffer| self.textures.get(framebuffer.attachment))
        else {
            return FramebufferStatus::Incomplete(IncompleteReason::MissingAttachment);
        };
        let texture = &attachment.texture;
        if !texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            || texture.dimension() != wgpu::TextureDimension::D2
            || texture.sample_count() != 1
        {
            return FramebufferStatus::Incomplete(IncompleteReason::UnsupportedAttachment);
        }
        FramebufferStatus::Complete
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(texture) {
            // Aliases of external images leave the image to its owner.
            if entry.external.is_none() {
                entry.texture.destroy();
            }
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.bound = target;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn set_scissor(&mut self, scissor: Option<Rect>) {
        self.scissor = scissor;
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        self.blend = blend;
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), DriverError> {
        let target = self.bound_target()?;
        if self.scissor.is_some() {
            // Load-op clears ignore the scissor; cover the scissored area instead.
            let description = DrawDescription {
                projection: IDENTITY_MATRIX,
                texture: None,
                mask: None,
                color,
                plane_alpha: 1.0,
                premultiplied_alpha: true,
                opaque: false,
                color_matrix: None,
            };
            let vertices = CLIP_SPACE_QUAD.map(|position| VertexGpu {
                position,
                tex_coord: [0.0, 0.0],
            });
            let (viewport, target_size) = (
                self.viewport,
                (target.texture.width(), target.texture.height()),
            );
            self.viewport = target_size;
            let result = self.encode_draw(&target, &vertices, &description, None, self.scissor);
            self.viewport = viewport;
            result?;
        } else {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("render_engine.clear_encoder"),
                });
            {
                let _clear_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("render_engine.clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: f64::from(color[0]),
                                g: f64::from(color[1]),
                                b: f64::from(color[2]),
                                a: f64::from(color[3]),
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
            self.queue.submit(Some(encoder.finish()));
        }
        self.mark_bound_rendered();
        Ok(())
    }

    fn draw(&mut self, mesh: &Mesh, description: &DrawDescription) -> Result<(), DriverError> {
        let target = self.bound_target()?;
        let positions = mesh.positions();
        let tex_coords = mesh.tex_coords();
        let vertices: Vec<VertexGpu> = mesh
            .triangle_list_indices()
            .into_iter()
            .map(|index| VertexGpu {
                position: positions[index],
                tex_coord: tex_coords
                    .and_then(|coords| coords.get(index).copied())
                    .unwrap_or([0.0, 0.0]),
            })
            .collect();
        if vertices.is_empty() {
            return Ok(());
        }
        trace!(vertices = vertices.len(), "wgpu draw");
        self.encode_draw(&target, &vertices, description, self.blend, self.scissor)?;
        self.mark_bound_rendered();
        Ok(())
    }

    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, DriverError> {
        let target = self.bound_target()?;
        if !target
            .texture
            .usage()
            .contains(wgpu::TextureUsages::COPY_SRC)
            || target.texture.format().block_copy_size(None) != Some(4)
        {
            return Err(DriverError::ReadbackUnsupported);
        }
        let rect = rect.clamp_to_size(target.texture.width(), target.texture.height());
        if rect.is_empty() {
            return Ok(Vec::new());
        }
        let width = rect.width() as u32;
        let height = rect.height() as u32;

        // wgpu requires bytes_per_row to be a multiple of 256 for texture copies to buffers.
        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(256) * 256;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("render_engine.readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("render_engine.readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.left as u32,
                    y: rect.top as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| DriverError::DevicePoll(error.to_string()))?;
        receiver
            .recv()
            .map_err(|error| DriverError::BufferMap(error.to_string()))?
            .map_err(|error| DriverError::BufferMap(error.to_string()))?;

        let mapped = readback.slice(..).get_mapped_range();
        let mut pixels = Vec::with_capacity(expected_rgba8_len(width, height));
        for row in mapped.chunks_exact(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback.unmap();
        Ok(pixels)
    }

    fn write_external_image(
        &mut self,
        image: ExternalImageHandle,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DriverError> {
        let texture = self
            .external_images
            .get(image)
            .ok_or(DriverError::UnknownExternalImage(image))?;
        let expected = expected_rgba8_len(width, height);
        if pixels.len() != expected {
            return Err(DriverError::PixelDataLength {
                expected,
                actual: pixels.len(),
            });
        }
        if !texture.usage().contains(wgpu::TextureUsages::COPY_DST)
            || texture.format().block_copy_size(None) != Some(4)
        {
            return Err(DriverError::ImageWriteUnsupported);
        }
        let row_bytes = width * 4;
        let width = width.min(texture.width());
        let height = height.min(texture.height());
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}
