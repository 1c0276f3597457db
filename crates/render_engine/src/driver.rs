//! GPU driver primitives consumed by the engine.
//!
//! A driver is a thin, stateful wrapper over one graphics API: it owns every
//! texture and framebuffer it hands out, tracks the bound target plus the
//! fixed-function state (viewport, scissor, blend), and executes draws with a
//! [`DrawDescription`] describing the program inputs.

use render_protocol::{
    ColorMatrix, ExternalImageHandle, FramebufferHandle, Mesh, Rect, Texture, TextureHandle,
    TransformMatrix4x4,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverLimits {
    pub max_texture_size: u32,
    pub max_viewport_dims: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendFunc {
    pub const PREMULTIPLIED_OVER: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
    pub const STRAIGHT_OVER: Self = Self {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The display surface (or whatever the driver treats as its default).
    #[default]
    Default,
    Framebuffer(FramebufferHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncompleteReason {
    MissingAttachment,
    UnsupportedAttachment,
    ZeroSizedAttachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(IncompleteReason),
}

impl FramebufferStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Usable as a color attachment and as a readback source.
    pub renderable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerMask {
    pub texture: Texture,
    pub alpha_threshold: f32,
}

/// Program inputs for one draw, resolved from the engine's render state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawDescription {
    pub projection: TransformMatrix4x4,
    pub texture: Option<Texture>,
    pub mask: Option<LayerMask>,
    pub color: [f32; 4],
    pub plane_alpha: f32,
    pub premultiplied_alpha: bool,
    pub opaque: bool,
    /// `None` when the active color matrix is the identity.
    pub color_matrix: Option<ColorMatrix>,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown texture handle {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("unknown framebuffer handle {0:?}")]
    UnknownFramebuffer(FramebufferHandle),
    #[error("unknown external image handle {0:?}")]
    UnknownExternalImage(ExternalImageHandle),
    #[error("pixel data has {actual} bytes, expected {expected}")]
    PixelDataLength { expected: usize, actual: usize },
    #[error("no default render target is configured")]
    NoDefaultTarget,
    #[error("bound target is not complete: {0:?}")]
    IncompleteTarget(IncompleteReason),
    #[error("bound target cannot be read back")]
    ReadbackUnsupported,
    #[error("external image cannot be written")]
    ImageWriteUnsupported,
    #[error("readback buffer mapping failed: {0}")]
    BufferMap(String),
    #[error("device poll failed: {0}")]
    DevicePoll(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
}

pub trait GpuDriver {
    fn limits(&self) -> DriverLimits;

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, DriverError>;

    /// Replaces the full contents of `texture` with tightly packed RGBA8 rows.
    fn upload_texture(&mut self, texture: TextureHandle, pixels: &[u8]) -> Result<(), DriverError>;

    /// Aliases an externally owned image as a texture. Deleting the returned
    /// texture drops the alias only; the image itself stays with its owner.
    fn import_external_image(&mut self, image: ExternalImageHandle)
    -> Result<Texture, DriverError>;

    fn create_framebuffer(
        &mut self,
        color_attachment: TextureHandle,
    ) -> Result<FramebufferHandle, DriverError>;

    /// Unknown handles report `Incomplete(MissingAttachment)`.
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Deleting an unknown or already deleted handle is a no-op.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn delete_texture(&mut self, texture: TextureHandle);

    fn bind_framebuffer(&mut self, target: RenderTarget);

    fn set_viewport(&mut self, width: u32, height: u32);

    /// Scissor rectangle in pixels of the bound target, origin top-left.
    fn set_scissor(&mut self, scissor: Option<Rect>);

    fn set_blend(&mut self, blend: Option<BlendFunc>);

    fn clear(&mut self, color: [f32; 4]) -> Result<(), DriverError>;

    fn draw(&mut self, mesh: &Mesh, description: &DrawDescription) -> Result<(), DriverError>;

    /// Reads RGBA8 rows of the bound target, top row first; `rect` uses a
    /// top-left origin.
    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, DriverError>;

    fn write_external_image(
        &mut self,
        image: ExternalImageHandle,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DriverError>;
}

pub(crate) fn expected_rgba8_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}
