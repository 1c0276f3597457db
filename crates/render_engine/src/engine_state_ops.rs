//! Render state mutation and the draw entry points.
//!
//! Fixed-function state (blend, scissor) is pushed to the driver as soon as it
//! changes; program inputs are resolved from `RenderState` per draw.

use render_protocol::{ColorMatrix, Mesh, Primitive, Rect, Texture};
use tracing::trace;

use crate::{ContractViolation, EngineError, GpuDriver, GpuRenderEngine};

impl<D: GpuDriver> GpuRenderEngine<D> {
    pub fn setup_layer_blending(&mut self, premultiplied_alpha: bool, opaque: bool, alpha: u8) {
        self.render_state
            .set_layer_blending(premultiplied_alpha, opaque, alpha);
        self.driver.set_blend(self.render_state.blend());
    }

    pub fn setup_dim_layer_blending(&mut self, alpha: u8) {
        self.render_state.set_dim_layer_blending(alpha);
        self.driver.set_blend(self.render_state.blend());
    }

    pub fn setup_layer_texturing(&mut self, texture: &Texture) {
        self.render_state.set_texture(*texture);
    }

    pub fn setup_layer_blacked_out(&mut self) {
        self.render_state.set_blacked_out();
    }

    pub fn setup_fill_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.render_state.set_fill_color([r, g, b, a]);
        self.driver.set_blend(None);
    }

    pub fn setup_color_transform(&mut self, color_transform: &ColorMatrix) -> ColorMatrix {
        self.render_state.replace_color_matrix(*color_transform)
    }

    pub fn disable_texturing(&mut self) {
        self.render_state.clear_texture();
    }

    pub fn disable_blending(&mut self) {
        self.render_state.clear_blend();
        self.driver.set_blend(None);
    }

    pub fn setup_layer_masking(&mut self, mask_texture: &Texture, alpha_threshold: f32) {
        self.render_state.set_mask(*mask_texture, alpha_threshold);
    }

    pub fn disable_layer_masking(&mut self) {
        self.render_state.clear_mask();
    }

    pub fn draw_mesh(&mut self, mesh: &Mesh) -> Result<(), EngineError> {
        if mesh.is_empty() {
            return Ok(());
        }
        let tex_coord_count = mesh.tex_coords().map_or(mesh.vertex_count(), <[_]>::len);
        if tex_coord_count != mesh.vertex_count() {
            return Err(ContractViolation::MeshAttributeMismatch {
                positions: mesh.vertex_count(),
                tex_coords: tex_coord_count,
            }
            .into());
        }
        for texture in self.render_state.sampled_textures() {
            self.check_texture_size(texture.width, texture.height)?;
        }

        let description = self
            .render_state
            .describe(self.projection_matrix(), &self.protected_texture);
        trace!(
            vertices = mesh.vertex_count(),
            primitive = ?mesh.primitive(),
            source = ?self.render_state.effective_source(),
            "draw mesh"
        );
        self.driver.draw(mesh, &description)?;
        Ok(())
    }

    pub fn clear_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) -> Result<(), EngineError> {
        self.driver.clear([r, g, b, a])?;
        Ok(())
    }

    /// Fills every rectangle of `region` (top-left origin in target pixels)
    /// with a flat color. Leaves the engine in fill mode.
    pub fn fill_region_with_color(
        &mut self,
        region: &[Rect],
        r: f32,
        g: f32,
        b: f32,
        a: f32,
    ) -> Result<(), EngineError> {
        let target_height = self
            .projection_state
            .projection
            .as_ref()
            .map_or(0, |projection| projection.target_height()) as f32;
        let mut positions = Vec::with_capacity(region.len() * 6);
        for rect in region.iter().filter(|rect| !rect.is_empty()) {
            let left = rect.left as f32;
            let right = rect.right as f32;
            let top = target_height - rect.top as f32;
            let bottom = target_height - rect.bottom as f32;
            positions.extend([
                [left, top],
                [left, bottom],
                [right, bottom],
                [left, top],
                [right, bottom],
                [right, top],
            ]);
        }

        self.setup_fill_with_color(r, g, b, a);
        self.draw_mesh(&Mesh::new(Primitive::Triangles, positions))
    }

    /// Restricts draws and clears to `scissor`, in top-left-origin pixels of
    /// the bound target.
    pub fn set_scissor(&mut self, scissor: Rect) {
        self.scissor = Some(scissor);
        self.driver.set_scissor(Some(scissor));
    }

    pub fn disable_scissor(&mut self) {
        self.scissor = None;
        self.driver.set_scissor(None);
    }

    /// RGBA8 rows of the bound target, top row first.
    pub fn read_pixels(&mut self, rect: Rect) -> Result<Vec<u8>, EngineError> {
        if rect.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.driver.read_pixels(rect)?)
    }
}
