//! Group stack and cache operations.
//!
//! A group redirects drawing into an off-screen target sized to the current
//! viewport. Ending it restores the enclosing target and composites the group
//! texture onto it through the group's color transform. Idle groups wait in
//! the cache keyed by exact size.

use render_protocol::{ColorMatrix, IDENTITY_MATRIX, Mesh, Rect, Rotation, Texture};
use tracing::{debug, trace};

use crate::{
    ContractViolation, EngineError, GpuDriver, GpuRenderEngine, Group, GroupKey, RenderState,
    RenderTarget, TextureDescriptor,
};

const TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

impl<D: GpuDriver> GpuRenderEngine<D> {
    pub fn begin_group(&mut self, color_transform: &ColorMatrix) -> Result<(), EngineError> {
        let key = self
            .current_group_key()
            .ok_or(ContractViolation::MissingViewport)?;
        self.check_texture_size(key.width, key.height)?;

        let previous_target = self.current_target();
        let mut group = match self.group_state.cache.take(key) {
            Some(group) => {
                self.group_state.stats.reused += 1;
                debug!(
                    width = key.width,
                    height = key.height,
                    "reusing cached group"
                );
                group
            }
            None => self.allocate_group(key)?,
        };
        group.color_transform = *color_transform;

        self.driver
            .bind_framebuffer(RenderTarget::Framebuffer(group.framebuffer));
        if self.config.clear_groups_on_begin {
            if let Err(error) = self.clear_unscissored(TRANSPARENT) {
                self.driver.bind_framebuffer(previous_target);
                self.return_to_cache(group);
                return Err(error);
            }
        }
        self.group_state.stack.push(group);
        Ok(())
    }

    pub fn end_group(&mut self) -> Result<(), EngineError> {
        let group = self
            .group_state
            .stack
            .pop()
            .ok_or(ContractViolation::UnmatchedEndGroup)?;
        let target = self.current_target();
        self.driver.bind_framebuffer(target);

        let composited = self.composite_group(&group);
        self.return_to_cache(group);
        composited
    }

    pub fn get_group(&mut self) -> Option<Group> {
        let key = self.current_group_key()?;
        self.group_state.cache.take(key)
    }

    pub fn put_group(&mut self, group: Group) -> Result<(), EngineError> {
        if !group.is_valid() {
            return Err(ContractViolation::InvalidGroup {
                width: group.width,
                height: group.height,
            }
            .into());
        }
        if self
            .group_state
            .stack
            .iter()
            .any(|active| active.framebuffer == group.framebuffer)
        {
            return Err(ContractViolation::GroupInUse {
                width: group.width,
                height: group.height,
            }
            .into());
        }
        self.return_to_cache(group);
        Ok(())
    }

    pub fn group_depth(&self) -> usize {
        self.group_state.stack.len()
    }

    /// Fails when a group begun this frame is still open.
    pub fn verify_frame_boundary(&self) -> Result<(), EngineError> {
        let depth = self.group_state.stack.len();
        if depth != 0 {
            return Err(ContractViolation::GroupsActive { depth }.into());
        }
        Ok(())
    }

    pub fn cached_group_keys(&self) -> Vec<GroupKey> {
        self.group_state.cache.iter().map(|(key, _)| *key).collect()
    }

    /// Target draws land on right now: the innermost group, else the bound
    /// external image, else the default surface.
    pub fn current_target(&self) -> RenderTarget {
        if let Some(group) = self.group_state.stack.last() {
            return RenderTarget::Framebuffer(group.framebuffer);
        }
        match self.binding_state.active {
            Some(binding) => RenderTarget::Framebuffer(binding.framebuffer),
            None => RenderTarget::Default,
        }
    }

    fn current_group_key(&self) -> Option<GroupKey> {
        let projection = self.projection_state.projection.as_ref()?;
        Some(GroupKey::new(
            projection.viewport_width(),
            projection.viewport_height(),
        ))
    }

    fn allocate_group(&mut self, key: GroupKey) -> Result<Group, EngineError> {
        let texture = self.driver.create_texture(&TextureDescriptor {
            label: "render_engine.group",
            width: key.width,
            height: key.height,
            renderable: true,
        })?;
        let framebuffer = match self.driver.create_framebuffer(texture) {
            Ok(framebuffer) => framebuffer,
            Err(error) => {
                self.driver.delete_texture(texture);
                return Err(error.into());
            }
        };
        self.group_state.stats.allocated += 1;
        debug!(width = key.width, height = key.height, "allocated group");
        Ok(Group {
            texture,
            framebuffer,
            width: key.width,
            height: key.height,
            color_transform: IDENTITY_MATRIX,
        })
    }

    fn return_to_cache(&mut self, group: Group) {
        if let Some(displaced) = self.group_state.cache.put(group) {
            debug!(
                width = displaced.width,
                height = displaced.height,
                "releasing displaced group"
            );
            self.release_group(displaced);
        }
    }

    fn clear_unscissored(&mut self, color: [f32; 4]) -> Result<(), EngineError> {
        if self.scissor.is_some() {
            self.driver.set_scissor(None);
        }
        let cleared = self.driver.clear(color);
        if self.scissor.is_some() {
            self.driver.set_scissor(self.scissor);
        }
        cleared.map_err(Into::into)
    }

    /// Draws `group` onto the bound target as a full-size quad. Caller render
    /// state survives except for the color matrix, which is left at identity.
    fn composite_group(&mut self, group: &Group) -> Result<(), EngineError> {
        let texture = Texture::new_2d(group.texture, group.width, group.height)
            .with_filtering(self.config.group_texture_filtering);
        let projection = projection::compose_projection(
            Rect::from_size(group.width, group.height),
            group.height,
            false,
            Rotation::Rot0,
        );
        let viewport = self.current_group_key();
        let mut saved = std::mem::replace(
            &mut self.render_state,
            RenderState::for_group_composite(texture, group.color_transform),
        );

        if viewport != Some(group.key()) {
            self.driver.set_viewport(group.width, group.height);
        }
        self.driver.set_blend(None);
        let description = self
            .render_state
            .describe(projection, &self.protected_texture);
        trace!(
            width = group.width,
            height = group.height,
            "compositing group"
        );
        let drawn = self.driver.draw(
            &Mesh::textured_quad(group.width as f32, group.height as f32),
            &description,
        );

        saved.replace_color_matrix(IDENTITY_MATRIX);
        self.render_state = saved;
        self.driver.set_blend(self.render_state.blend());
        match viewport {
            Some(viewport) if viewport != group.key() => {
                self.driver.set_viewport(viewport.width, viewport.height);
            }
            _ => {}
        }
        drawn.map_err(Into::into)
    }
}
