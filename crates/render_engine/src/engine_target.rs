//! External image binding.
//!
//! The direct path aliases the image as a texture and renders into it. The
//! readback path renders into an internal target of the requested size and
//! copies its pixels into the image when the binding is released, for images
//! the device cannot attach.

use render_protocol::{ExternalImageHandle, FramebufferHandle, Rect, TextureHandle};
use tracing::{debug, warn};

use crate::{
    ContractViolation, EngineError, FramebufferStatus, GpuDriver, GpuRenderEngine, ImageBinding,
    IncompleteReason, ReadbackPixels, RenderTarget, TextureDescriptor,
};

impl<D: GpuDriver> GpuRenderEngine<D> {
    /// Makes `image` the draw target. A target the device cannot render to is
    /// reported through [`ImageBinding::status`], not as an error; the binding
    /// must still be released with [`Self::unbind_framebuffer`].
    pub fn bind_image_as_framebuffer(
        &mut self,
        image: ExternalImageHandle,
        use_read_pixels: bool,
        req_width: u32,
        req_height: u32,
    ) -> Result<ImageBinding, EngineError> {
        if self.binding_state.active.is_some() {
            return Err(ContractViolation::ExternalTargetAlreadyBound.into());
        }
        self.verify_frame_boundary()?;

        let binding = if use_read_pixels && (req_width == 0 || req_height == 0) {
            ImageBinding {
                image,
                texture: TextureHandle::default(),
                framebuffer: FramebufferHandle::default(),
                status: FramebufferStatus::Incomplete(IncompleteReason::ZeroSizedAttachment),
                use_read_pixels,
                width: req_width,
                height: req_height,
            }
        } else {
            let (texture, width, height) = if use_read_pixels {
                self.check_texture_size(req_width, req_height)?;
                let texture = self.driver.create_texture(&TextureDescriptor {
                    label: "render_engine.readback_target",
                    width: req_width,
                    height: req_height,
                    renderable: true,
                })?;
                (texture, req_width, req_height)
            } else {
                let texture = self.driver.import_external_image(image)?;
                (texture.handle, texture.width, texture.height)
            };
            let framebuffer = match self.driver.create_framebuffer(texture) {
                Ok(framebuffer) => framebuffer,
                Err(error) => {
                    self.driver.delete_texture(texture);
                    return Err(error.into());
                }
            };
            ImageBinding {
                image,
                texture,
                framebuffer,
                status: self.driver.framebuffer_status(framebuffer),
                use_read_pixels,
                width,
                height,
            }
        };

        self.driver
            .bind_framebuffer(RenderTarget::Framebuffer(binding.framebuffer));
        if binding.status.is_complete() {
            debug!(
                width = binding.width,
                height = binding.height,
                use_read_pixels,
                "bound external image as framebuffer"
            );
        } else {
            warn!(
                status = ?binding.status,
                use_read_pixels,
                "external image framebuffer is incomplete"
            );
        }
        self.binding_state.active = Some(binding);
        Ok(binding)
    }

    /// Restores the default target and releases the binding's resources. On
    /// the readback path the rendered pixels are copied into the image and
    /// also returned.
    pub fn unbind_framebuffer(
        &mut self,
        binding: ImageBinding,
    ) -> Result<Option<ReadbackPixels>, EngineError> {
        let active = self
            .binding_state
            .active
            .ok_or(ContractViolation::NoActiveBinding)?;
        if active != binding {
            return Err(ContractViolation::BindingMismatch.into());
        }
        self.verify_frame_boundary()?;

        let readback = if binding.use_read_pixels && binding.status.is_complete() {
            self.copy_target_into_image(&binding).map(Some)
        } else {
            Ok(None)
        };

        self.binding_state.active = None;
        self.driver.bind_framebuffer(RenderTarget::Default);
        self.driver.delete_framebuffer(binding.framebuffer);
        self.driver.delete_texture(binding.texture);
        debug!(
            use_read_pixels = binding.use_read_pixels,
            "unbound external image"
        );
        readback
    }

    pub fn active_binding(&self) -> Option<ImageBinding> {
        self.binding_state.active
    }

    fn copy_target_into_image(
        &mut self,
        binding: &ImageBinding,
    ) -> Result<ReadbackPixels, EngineError> {
        let data = self
            .driver
            .read_pixels(Rect::from_size(binding.width, binding.height))?;
        self.driver
            .write_external_image(binding.image, binding.width, binding.height, &data)?;
        Ok(ReadbackPixels {
            width: binding.width,
            height: binding.height,
            data,
        })
    }
}
