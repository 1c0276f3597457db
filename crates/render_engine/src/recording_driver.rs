//! In-memory driver that records every call.
//!
//! Targets hold a single flat color: clears and untextured draws overwrite it,
//! `read_pixels` repeats it. That is enough to observe target routing and the
//! readback path without a GPU.

use render_protocol::{ExternalImageHandle, FramebufferHandle, Mesh, Rect, Texture, TextureHandle};
use slotmap::SlotMap;

use crate::driver::expected_rgba8_len;
use crate::{
    BlendFunc, DrawDescription, DriverError, DriverLimits, FramebufferStatus, GpuDriver,
    IncompleteReason, RenderTarget, TextureDescriptor,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    CreateTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
        renderable: bool,
    },
    UploadTexture(TextureHandle),
    ImportExternalImage {
        image: ExternalImageHandle,
        texture: TextureHandle,
    },
    CreateFramebuffer {
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
    },
    DeleteFramebuffer(FramebufferHandle),
    DeleteTexture(TextureHandle),
    BindFramebuffer(RenderTarget),
    SetViewport {
        width: u32,
        height: u32,
    },
    SetScissor(Option<Rect>),
    SetBlend(Option<BlendFunc>),
    Clear {
        target: RenderTarget,
        color: [f32; 4],
    },
    Draw {
        target: RenderTarget,
        positions: Vec<[f32; 2]>,
        description: DrawDescription,
    },
    ReadPixels {
        target: RenderTarget,
        rect: Rect,
    },
    WriteExternalImage {
        image: ExternalImageHandle,
        width: u32,
        height: u32,
    },
}

#[derive(Debug)]
struct RecordedTexture {
    width: u32,
    height: u32,
    external: Option<ExternalImageHandle>,
}

#[derive(Debug)]
struct RecordedFramebuffer {
    attachment: TextureHandle,
    contents: [u8; 4],
}

#[derive(Debug)]
struct RecordedImage {
    width: u32,
    height: u32,
    attachable: bool,
    pixels: Vec<u8>,
}

#[derive(Debug)]
pub struct RecordingDriver {
    limits: DriverLimits,
    textures: SlotMap<TextureHandle, RecordedTexture>,
    framebuffers: SlotMap<FramebufferHandle, RecordedFramebuffer>,
    images: SlotMap<ExternalImageHandle, RecordedImage>,
    bound: RenderTarget,
    default_contents: [u8; 4],
    viewport: (u32, u32),
    scissor: Option<Rect>,
    blend: Option<BlendFunc>,
    fail_clears: bool,
    calls: Vec<DriverCall>,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new(DriverLimits {
            max_texture_size: 4096,
            max_viewport_dims: (4096, 4096),
        })
    }
}

impl RecordingDriver {
    pub fn new(limits: DriverLimits) -> Self {
        Self {
            limits,
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            bound: RenderTarget::Default,
            default_contents: [0, 0, 0, 0],
            viewport: (0, 0),
            scissor: None,
            blend: None,
            fail_clears: false,
            calls: Vec::new(),
        }
    }

    /// Registers a platform image. Non-attachable images can only be rendered
    /// through the readback path.
    pub fn add_external_image(
        &mut self,
        width: u32,
        height: u32,
        attachable: bool,
    ) -> ExternalImageHandle {
        self.images.insert(RecordedImage {
            width,
            height,
            attachable,
            pixels: vec![0; expected_rgba8_len(width, height)],
        })
    }

    pub fn external_image_pixels(&self, image: ExternalImageHandle) -> Option<&[u8]> {
        self.images.get(image).map(|image| image.pixels.as_slice())
    }

    /// Makes every following `clear` fail.
    pub fn set_fail_clears(&mut self, fail: bool) {
        self.fail_clears = fail;
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn has_texture(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(texture)
    }

    pub fn has_framebuffer(&self, framebuffer: FramebufferHandle) -> bool {
        self.framebuffers.contains_key(framebuffer)
    }

    pub fn bound_target(&self) -> RenderTarget {
        self.bound
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn scissor(&self) -> Option<Rect> {
        self.scissor
    }

    pub fn blend(&self) -> Option<BlendFunc> {
        self.blend
    }

    pub fn draws(&self) -> Vec<(RenderTarget, DrawDescription)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::Draw {
                    target,
                    description,
                    ..
                } => Some((*target, *description)),
                _ => None,
            })
            .collect()
    }

    fn contents_mut(&mut self) -> Result<&mut [u8; 4], DriverError> {
        match self.bound {
            RenderTarget::Default => Ok(&mut self.default_contents),
            RenderTarget::Framebuffer(framebuffer) => {
                if let FramebufferStatus::Incomplete(reason) = self.framebuffer_status(framebuffer)
                {
                    return Err(DriverError::IncompleteTarget(reason));
                }
                self.framebuffers
                    .get_mut(framebuffer)
                    .map(|framebuffer| &mut framebuffer.contents)
                    .ok_or(DriverError::UnknownFramebuffer(framebuffer))
            }
        }
    }
}

fn color_to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8)
}

impl GpuDriver for RecordingDriver {
    fn limits(&self) -> DriverLimits {
        self.limits
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, DriverError> {
        let texture = self.textures.insert(RecordedTexture {
            width: descriptor.width,
            height: descriptor.height,
            external: None,
        });
        self.calls.push(DriverCall::CreateTexture {
            texture,
            width: descriptor.width,
            height: descriptor.height,
            renderable: descriptor.renderable,
        });
        Ok(texture)
    }

    fn upload_texture(&mut self, texture: TextureHandle, pixels: &[u8]) -> Result<(), DriverError> {
        let recorded = self
            .textures
            .get(texture)
            .ok_or(DriverError::UnknownTexture(texture))?;
        let expected = expected_rgba8_len(recorded.width, recorded.height);
        if pixels.len() != expected {
            return Err(DriverError::PixelDataLength {
                expected,
                actual: pixels.len(),
            });
        }
        self.calls.push(DriverCall::UploadTexture(texture));
        Ok(())
    }

    fn import_external_image(
        &mut self,
        image: ExternalImageHandle,
    ) -> Result<Texture, DriverError> {
        let recorded = self
            .images
            .get(image)
            .ok_or(DriverError::UnknownExternalImage(image))?;
        let (width, height) = (recorded.width, recorded.height);
        let texture = self.textures.insert(RecordedTexture {
            width,
            height,
            external: Some(image),
        });
        self.calls
            .push(DriverCall::ImportExternalImage { image, texture });
        Ok(Texture::new_external(texture, width, height))
    }

    fn create_framebuffer(
        &mut self,
        color_attachment: TextureHandle,
    ) -> Result<FramebufferHandle, DriverError> {
        if !self.textures.contains_key(color_attachment) {
            return Err(DriverError::UnknownTexture(color_attachment));
        }
        let framebuffer = self.framebuffers.insert(RecordedFramebuffer {
            attachment: color_attachment,
            contents: [0, 0, 0, 0],
        });
        self.calls.push(DriverCall::CreateFramebuffer {
            framebuffer,
            texture: color_attachment,
        });
        Ok(framebuffer)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(texture) = self
            .framebuffers
            .get(framebuffer)
            .and_then(|framebuffer| self.textures.get(framebuffer.attachment))
        else {
            return FramebufferStatus::Incomplete(IncompleteReason::MissingAttachment);
        };
        if texture.width == 0 || texture.height == 0 {
            return FramebufferStatus::Incomplete(IncompleteReason::ZeroSizedAttachment);
        }
        let attachable = texture
            .external
            .and_then(|image| self.images.get(image))
            .is_none_or(|image| image.attachable);
        if !attachable {
            return FramebufferStatus::Incomplete(IncompleteReason::UnsupportedAttachment);
        }
        FramebufferStatus::Complete
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(framebuffer).is_some() {
            self.calls.push(DriverCall::DeleteFramebuffer(framebuffer));
        }
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(texture).is_some() {
            self.calls.push(DriverCall::DeleteTexture(texture));
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.bound = target;
        self.calls.push(DriverCall::BindFramebuffer(target));
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.calls.push(DriverCall::SetViewport { width, height });
    }

    fn set_scissor(&mut self, scissor: Option<Rect>) {
        self.scissor = scissor;
        self.calls.push(DriverCall::SetScissor(scissor));
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        self.blend = blend;
        self.calls.push(DriverCall::SetBlend(blend));
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), DriverError> {
        if self.fail_clears {
            return Err(DriverError::DeviceLost("injected clear failure".to_owned()));
        }
        *self.contents_mut()? = color_to_rgba8(color);
        self.calls.push(DriverCall::Clear {
            target: self.bound,
            color,
        });
        Ok(())
    }

    fn draw(&mut self, mesh: &Mesh, description: &DrawDescription) -> Result<(), DriverError> {
        for texture in description
            .texture
            .iter()
            .chain(description.mask.iter().map(|mask| &mask.texture))
        {
            if !self.textures.contains_key(texture.handle) {
                return Err(DriverError::UnknownTexture(texture.handle));
            }
        }
        let contents = self.contents_mut()?;
        if description.texture.is_none() {
            *contents = color_to_rgba8(description.color);
        }
        self.calls.push(DriverCall::Draw {
            target: self.bound,
            positions: mesh.positions().to_vec(),
            description: *description,
        });
        Ok(())
    }

    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, DriverError> {
        let contents = *self.contents_mut()?;
        self.calls.push(DriverCall::ReadPixels {
            target: self.bound,
            rect,
        });
        let pixel_count = rect.width().max(0) as usize * rect.height().max(0) as usize;
        Ok(contents.repeat(pixel_count))
    }

    fn write_external_image(
        &mut self,
        image: ExternalImageHandle,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DriverError> {
        let expected = expected_rgba8_len(width, height);
        if pixels.len() != expected {
            return Err(DriverError::PixelDataLength {
                expected,
                actual: pixels.len(),
            });
        }
        let recorded = self
            .images
            .get_mut(image)
            .ok_or(DriverError::UnknownExternalImage(image))?;
        recorded.width = width;
        recorded.height = height;
        recorded.pixels = pixels.to_vec();
        self.calls.push(DriverCall::WriteExternalImage {
            image,
            width,
            height,
        });
        Ok(())
    }
}
