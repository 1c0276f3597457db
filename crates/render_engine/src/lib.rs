//! Render engine crate root.
//!
//! This module defines the compositor-facing API (`RenderEngine`) and the GPU-backed
//! implementation (`GpuRenderEngine`), whose state is split into compartments that the
//! operation modules mutate.
//!
//! Internal architecture overview:
//! - `engine_init`: construction, teardown and resource release.
//! - `engine_state_ops`: per-layer render state, fills, scissor and `draw_mesh`.
//! - `engine_viewport`: viewport/projection configuration and device limit queries.
//! - `engine_group`: the group stack, the size-keyed group cache and group compositing.
//! - `engine_target`: binding external images as the draw target.
//! - `engine_dump`: human-readable state dump.
//! - `driver`: the `GpuDriver` primitive trait; `wgpu_driver` implements it on wgpu.

use projection::ViewportProjection;
use render_protocol::{
    ColorMatrix, ExternalImageHandle, FramebufferHandle, Mesh, Rect, Rotation, Texture,
    TextureHandle,
};

mod config;
mod driver;
mod engine_dump;
mod engine_group;
mod engine_init;
mod engine_state_ops;
mod engine_target;
mod engine_viewport;
mod error;
mod group_cache;
#[cfg(any(test, feature = "test-helpers"))]
mod recording_driver;
mod render_state;
mod scope;
#[cfg(feature = "wgpu-driver")]
mod wgpu_driver;
#[cfg(feature = "wgpu-driver")]
mod wgpu_driver_pipeline;

pub use config::{ConfigError, RenderEngineConfig};
pub use driver::{
    BlendFactor, BlendFunc, DrawDescription, DriverError, DriverLimits, FramebufferStatus,
    GpuDriver, IncompleteReason, LayerMask, RenderTarget, TextureDescriptor,
};
pub use error::{ContractViolation, EngineError, ResourceKind};
pub use group_cache::{Group, GroupKey};
#[cfg(any(test, feature = "test-helpers"))]
pub use recording_driver::{DriverCall, RecordingDriver};
pub use render_state::{DrawSource, RenderState, TexturingSource};
pub use scope::{GroupScope, ImageTargetScope};
#[cfg(feature = "wgpu-driver")]
pub use wgpu_driver::WgpuDriver;

use group_cache::GroupCache;

/// An external image attached as the draw target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    pub image: ExternalImageHandle,
    pub texture: TextureHandle,
    pub framebuffer: FramebufferHandle,
    pub status: FramebufferStatus,
    pub use_read_pixels: bool,
    pub width: u32,
    pub height: u32,
}

/// Pixels copied out of the internal target when a readback binding is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadbackPixels {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, top row first.
    pub data: Vec<u8>,
}

/// Compositor-facing render engine.
///
/// Render state set through the `setup_*` and `disable_*` calls persists across draws
/// until overwritten. Group and external-target calls nest strictly; misuse is reported
/// as [`EngineError::Contract`] and leaves the engine state unchanged.
pub trait RenderEngine {
    fn set_viewport_and_projection(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
        source_crop: Rect,
        target_height: u32,
        y_swap: bool,
        rotation: Rotation,
    ) -> Result<(), EngineError>;

    fn setup_layer_blending(&mut self, premultiplied_alpha: bool, opaque: bool, alpha: u8);
    fn setup_dim_layer_blending(&mut self, alpha: u8);
    fn setup_layer_texturing(&mut self, texture: &Texture);
    fn setup_layer_blacked_out(&mut self);
    fn setup_fill_with_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    /// Installs `color_transform` and returns the matrix it replaced.
    fn setup_color_transform(&mut self, color_transform: &ColorMatrix) -> ColorMatrix;
    fn disable_texturing(&mut self);
    fn disable_blending(&mut self);
    fn setup_layer_masking(&mut self, mask_texture: &Texture, alpha_threshold: f32);
    fn disable_layer_masking(&mut self);

    fn draw_mesh(&mut self, mesh: &Mesh) -> Result<(), EngineError>;
    fn clear_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) -> Result<(), EngineError>;
    fn fill_region_with_color(
        &mut self,
        region: &[Rect],
        r: f32,
        g: f32,
        b: f32,
        a: f32,
    ) -> Result<(), EngineError>;
    fn set_scissor(&mut self, scissor: Rect);
    fn disable_scissor(&mut self);
    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, EngineError>;

    fn begin_group(&mut self, color_transform: &ColorMatrix) -> Result<(), EngineError>;
    fn end_group(&mut self) -> Result<(), EngineError>;
    /// Takes the cached group matching the current viewport, if any.
    fn get_group(&mut self) -> Option<Group>;
    fn put_group(&mut self, group: Group) -> Result<(), EngineError>;
    fn group_depth(&self) -> usize;
    fn verify_frame_boundary(&self) -> Result<(), EngineError>;

    fn bind_image_as_framebuffer(
        &mut self,
        image: ExternalImageHandle,
        use_read_pixels: bool,
        req_width: u32,
        req_height: u32,
    ) -> Result<ImageBinding, EngineError>;
    fn unbind_framebuffer(
        &mut self,
        binding: ImageBinding,
    ) -> Result<Option<ReadbackPixels>, EngineError>;

    fn max_texture_size(&self) -> u32;
    fn max_viewport_dims(&self) -> (u32, u32);
    fn viewport_width(&self) -> u32;
    fn viewport_height(&self) -> u32;
    fn projection_source_crop(&self) -> Rect;
    fn projection_y_swap(&self) -> bool;
    fn projection_rotation(&self) -> Rotation;
    fn check_texture_size(&self, width: u32, height: u32) -> Result<(), EngineError>;

    fn dump(&self, out: &mut String);

    /// Begins a group that ends when the returned guard is finished or dropped.
    fn scoped_group(
        &mut self,
        color_transform: &ColorMatrix,
    ) -> Result<GroupScope<'_, Self>, EngineError>
    where
        Self: Sized,
    {
        GroupScope::begin(self, color_transform)
    }
}

struct ProjectionState {
    projection: Option<ViewportProjection>,
}

#[derive(Debug, Default, Clone, Copy)]
struct GroupStats {
    allocated: u64,
    reused: u64,
    released: u64,
}

struct GroupState {
    cache: GroupCache,
    stack: Vec<Group>,
    stats: GroupStats,
}

struct BindingState {
    active: Option<ImageBinding>,
}

pub struct GpuRenderEngine<D: GpuDriver> {
    driver: D,
    config: RenderEngineConfig,
    limits: DriverLimits,
    protected_texture: Texture,
    projection_state: ProjectionState,
    render_state: RenderState,
    group_state: GroupState,
    binding_state: BindingState,
    scissor: Option<Rect>,
}

impl<D: GpuDriver> RenderEngine for GpuRenderEngine<D> {
    fn set_viewport_and_projection(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
        source_crop: Rect,
        target_height: u32,
        y_swap: bool,
        rotation: Rotation,
    ) -> Result<(), EngineError> {
        GpuRenderEngine::set_viewport_and_projection(
            self,
            viewport_width,
            viewport_height,
            source_crop,
            target_height,
            y_swap,
            rotation,
        )
    }

    fn setup_layer_blending(&mut self, premultiplied_alpha: bool, opaque: bool, alpha: u8) {
        GpuRenderEngine::setup_layer_blending(self, premultiplied_alpha, opaque, alpha);
    }

    fn setup_dim_layer_blending(&mut self, alpha: u8) {
        GpuRenderEngine::setup_dim_layer_blending(self, alpha);
    }

    fn setup_layer_texturing(&mut self, texture: &Texture) {
        GpuRenderEngine::setup_layer_texturing(self, texture);
    }

    fn setup_layer_blacked_out(&mut self) {
        GpuRenderEngine::setup_layer_blacked_out(self);
    }

    fn setup_fill_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        GpuRenderEngine::setup_fill_with_color(self, r, g, b, a);
    }

    fn setup_color_transform(&mut self, color_transform: &ColorMatrix) -> ColorMatrix {
        GpuRenderEngine::setup_color_transform(self, color_transform)
    }

    fn disable_texturing(&mut self) {
        GpuRenderEngine::disable_texturing(self);
    }

    fn disable_blending(&mut self) {
        GpuRenderEngine::disable_blending(self);
    }

    fn setup_layer_masking(&mut self, mask_texture: &Texture, alpha_threshold: f32) {
        GpuRenderEngine::setup_layer_masking(self, mask_texture, alpha_threshold);
    }

    fn disable_layer_masking(&mut self) {
        GpuRenderEngine::disable_layer_masking(self);
    }

    fn draw_mesh(&mut self, mesh: &Mesh) -> Result<(), EngineError> {
        GpuRenderEngine::draw_mesh(self, mesh)
    }

    fn clear_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) -> Result<(), EngineError> {
        GpuRenderEngine::clear_with_color(self, r, g, b, a)
    }

    fn fill_region_with_color(
        &mut self,
        region: &[Rect],
        r: f32,
        g: f32,
        b: f32,
        a: f32,
    ) -> Result<(), EngineError> {
        GpuRenderEngine::fill_region_with_color(self, region, r, g, b, a)
    }

    fn set_scissor(&mut self, scissor: Rect) {
        GpuRenderEngine::set_scissor(self, scissor);
    }

    fn disable_scissor(&mut self) {
        GpuRenderEngine::disable_scissor(self);
    }

    fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, EngineError> {
        GpuRenderEngine::read_pixels(self, rect)
    }

    fn begin_group(&mut self, color_transform: &ColorMatrix) -> Result<(), EngineError> {
        GpuRenderEngine::begin_group(self, color_transform)
    }

    fn end_group(&mut self) -> Result<(), EngineError> {
        GpuRenderEngine::end_group(self)
    }

    fn get_group(&mut self) -> Option<Group> {
        GpuRenderEngine::get_group(self)
    }

    fn put_group(&mut self, group: Group) -> Result<(), EngineError> {
        GpuRenderEngine::put_group(self, group)
    }

    fn group_depth(&self) -> usize {
        GpuRenderEngine::group_depth(self)
    }

    fn verify_frame_boundary(&self) -> Result<(), EngineError> {
        GpuRenderEngine::verify_frame_boundary(self)
    }

    fn bind_image_as_framebuffer(
        &mut self,
        image: ExternalImageHandle,
        use_read_pixels: bool,
        req_width: u32,
        req_height: u32,
    ) -> Result<ImageBinding, EngineError> {
        GpuRenderEngine::bind_image_as_framebuffer(
            self,
            image,
            use_read_pixels,
            req_width,
            req_height,
        )
    }

    fn unbind_framebuffer(
        &mut self,
        binding: ImageBinding,
    ) -> Result<Option<ReadbackPixels>, EngineError> {
        GpuRenderEngine::unbind_framebuffer(self, binding)
    }

    fn max_texture_size(&self) -> u32 {
        GpuRenderEngine::max_texture_size(self)
    }

    fn max_viewport_dims(&self) -> (u32, u32) {
        GpuRenderEngine::max_viewport_dims(self)
    }

    fn viewport_width(&self) -> u32 {
        GpuRenderEngine::viewport_width(self)
    }

    fn viewport_height(&self) -> u32 {
        GpuRenderEngine::viewport_height(self)
    }

    fn projection_source_crop(&self) -> Rect {
        GpuRenderEngine::projection_source_crop(self)
    }

    fn projection_y_swap(&self) -> bool {
        GpuRenderEngine::projection_y_swap(self)
    }

    fn projection_rotation(&self) -> Rotation {
        GpuRenderEngine::projection_rotation(self)
    }

    fn check_texture_size(&self, width: u32, height: u32) -> Result<(), EngineError> {
        GpuRenderEngine::check_texture_size(self, width, height)
    }

    fn dump(&self, out: &mut String) {
        GpuRenderEngine::dump(self, out);
    }
}

#[cfg(test)]
mod tests;
