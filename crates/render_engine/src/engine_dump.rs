use std::fmt::Write;

use crate::{GpuDriver, GpuRenderEngine};

impl<D: GpuDriver> GpuRenderEngine<D> {
    /// Appends a human-readable snapshot of limits, projection, render state,
    /// groups and binding to `out`.
    pub fn dump(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = self.write_dump(out);
    }

    fn write_dump(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "RenderEngine (gpu)")?;
        writeln!(
            out,
            "  limits: max_texture_size={} max_viewport_dims={}x{}",
            self.limits.max_texture_size,
            self.limits.max_viewport_dims.0,
            self.limits.max_viewport_dims.1
        )?;
        match self.projection_state.projection.as_ref() {
            Some(projection) => {
                let crop = projection.source_crop();
                writeln!(
                    out,
                    "  viewport: {}x{} crop=[{}, {}, {}, {}] target_height={} y_swap={} rotation={}",
                    projection.viewport_width(),
                    projection.viewport_height(),
                    crop.left,
                    crop.top,
                    crop.right,
                    crop.bottom,
                    projection.target_height(),
                    projection.y_swap(),
                    projection.rotation().degrees()
                )?;
            }
            None => writeln!(out, "  viewport: unset")?,
        }

        let state = &self.render_state;
        writeln!(
            out,
            "  state: blend={:?} premultiplied={} opaque={} plane_alpha={:.3} source={:?} mask={} color_matrix_identity={}",
            state.blend(),
            state.premultiplied_alpha(),
            state.opaque(),
            state.plane_alpha(),
            state.effective_source(),
            state.mask().is_some(),
            render_protocol::is_identity(&state.color_matrix())
        )?;
        writeln!(out, "  scissor: {:?}", self.scissor)?;

        let stats = self.group_state.stats;
        writeln!(
            out,
            "  groups: depth={} cached={} allocated={} reused={} released={}",
            self.group_state.stack.len(),
            self.group_state.cache.len(),
            stats.allocated,
            stats.reused,
            stats.released
        )?;
        for (key, _) in self.group_state.cache.iter() {
            writeln!(out, "    cached {}x{}", key.width, key.height)?;
        }

        match self.binding_state.active {
            Some(binding) => writeln!(
                out,
                "  binding: {}x{} use_read_pixels={} status={:?}",
                binding.width, binding.height, binding.use_read_pixels, binding.status
            ),
            None => writeln!(out, "  binding: none"),
        }
    }
}
