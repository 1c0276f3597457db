use projection::ViewportProjection;
use render_protocol::{Rect, Rotation, TransformMatrix4x4};
use tracing::debug;

use crate::{EngineError, GpuDriver, GpuRenderEngine, ResourceKind};

impl<D: GpuDriver> GpuRenderEngine<D> {
    pub fn set_viewport_and_projection(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
        source_crop: Rect,
        target_height: u32,
        y_swap: bool,
        rotation: Rotation,
    ) -> Result<(), EngineError> {
        let (max_width, max_height) = self.limits.max_viewport_dims;
        check_limit(ResourceKind::ViewportWidth, viewport_width, max_width)?;
        check_limit(ResourceKind::ViewportHeight, viewport_height, max_height)?;

        let projection = ViewportProjection::new(
            viewport_width,
            viewport_height,
            source_crop,
            target_height,
            y_swap,
            rotation,
        )?;
        self.driver.set_viewport(viewport_width, viewport_height);
        debug!(
            viewport_width,
            viewport_height,
            ?source_crop,
            target_height,
            y_swap,
            rotation = rotation.degrees(),
            "viewport and projection updated"
        );
        self.projection_state.projection = Some(projection);
        Ok(())
    }

    pub fn projection(&self) -> Option<&ViewportProjection> {
        self.projection_state.projection.as_ref()
    }

    /// Projection applied to draws; identity until a viewport is configured.
    pub(crate) fn projection_matrix(&self) -> TransformMatrix4x4 {
        self.projection_state
            .projection
            .as_ref()
            .map(ViewportProjection::matrix)
            .unwrap_or(render_protocol::IDENTITY_MATRIX)
    }

    pub fn max_texture_size(&self) -> u32 {
        self.limits.max_texture_size
    }

    pub fn max_viewport_dims(&self) -> (u32, u32) {
        self.limits.max_viewport_dims
    }

    pub fn viewport_width(&self) -> u32 {
        self.projection_state
            .projection
            .as_ref()
            .map_or(0, ViewportProjection::viewport_width)
    }

    pub fn viewport_height(&self) -> u32 {
        self.projection_state
            .projection
            .as_ref()
            .map_or(0, ViewportProjection::viewport_height)
    }

    pub fn projection_source_crop(&self) -> Rect {
        self.projection_state
            .projection
            .as_ref()
            .map(ViewportProjection::source_crop)
            .unwrap_or_default()
    }

    pub fn projection_y_swap(&self) -> bool {
        self.projection_state
            .projection
            .as_ref()
            .is_some_and(ViewportProjection::y_swap)
    }

    pub fn projection_rotation(&self) -> Rotation {
        self.projection_state
            .projection
            .as_ref()
            .map(ViewportProjection::rotation)
            .unwrap_or_default()
    }

    pub fn check_texture_size(&self, width: u32, height: u32) -> Result<(), EngineError> {
        let max = self.limits.max_texture_size;
        check_limit(ResourceKind::TextureWidth, width, max)?;
        check_limit(ResourceKind::TextureHeight, height, max)
    }
}

fn check_limit(kind: ResourceKind, requested: u32, max: u32) -> Result<(), EngineError> {
    if requested > max {
        return Err(EngineError::ResourceLimit {
            kind,
            requested,
            max,
        });
    }
    Ok(())
}
