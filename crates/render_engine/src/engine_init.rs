//! Engine construction and teardown.
//!
//! Owns `GpuRenderEngine::new`, which validates the config and allocates the
//! protected texture, plus the release paths used by `Drop`.

use render_protocol::Texture;
use tracing::{debug, info};

use crate::group_cache::GroupCache;
use crate::{
    BindingState, EngineError, GpuDriver, GpuRenderEngine, Group, GroupState, GroupStats,
    ProjectionState, RenderEngineConfig, RenderState, RenderTarget, TextureDescriptor,
};

/// Opaque black, sampled in place of content that must not be shown.
const PROTECTED_TEXTURE_PIXEL: [u8; 4] = [0, 0, 0, 255];

impl<D: GpuDriver> GpuRenderEngine<D> {
    pub fn new(mut driver: D, config: RenderEngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let limits = driver.limits();

        let protected_handle = driver.create_texture(&TextureDescriptor {
            label: "render_engine.protected_texture",
            width: 1,
            height: 1,
            renderable: false,
        })?;
        if let Err(error) = driver.upload_texture(protected_handle, &PROTECTED_TEXTURE_PIXEL) {
            driver.delete_texture(protected_handle);
            return Err(error.into());
        }

        info!(
            max_texture_size = limits.max_texture_size,
            max_viewport_width = limits.max_viewport_dims.0,
            max_viewport_height = limits.max_viewport_dims.1,
            max_cached_groups = ?config.max_cached_groups,
            "render engine initialized"
        );

        Ok(Self {
            driver,
            limits,
            protected_texture: Texture::new_2d(protected_handle, 1, 1),
            projection_state: ProjectionState { projection: None },
            render_state: RenderState::default(),
            group_state: GroupState {
                cache: GroupCache::new(config.max_cached_groups),
                stack: Vec::new(),
                stats: GroupStats::default(),
            },
            binding_state: BindingState { active: None },
            scissor: None,
            config,
        })
    }

    pub fn config(&self) -> &RenderEngineConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Direct driver access, for registering external images and similar
    /// driver-specific setup. Resources the engine handed out must not be
    /// deleted through it.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    pub fn protected_texture(&self) -> Texture {
        self.protected_texture
    }

    pub fn cached_group_count(&self) -> usize {
        self.group_state.cache.len()
    }

    /// Releases every idle cached group. Groups on the stack are untouched.
    pub fn release_cached_groups(&mut self) -> usize {
        let drained = self.group_state.cache.drain();
        let count = drained.len();
        for group in drained {
            self.release_group(group);
        }
        if count > 0 {
            debug!(count, "released cached groups");
        }
        count
    }

    pub(crate) fn release_group(&mut self, group: Group) {
        self.driver.delete_framebuffer(group.framebuffer);
        self.driver.delete_texture(group.texture);
        self.group_state.stats.released += 1;
    }
}

impl<D: GpuDriver> Drop for GpuRenderEngine<D> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding_state.active.take() {
            self.driver.bind_framebuffer(RenderTarget::Default);
            self.driver.delete_framebuffer(binding.framebuffer);
            self.driver.delete_texture(binding.texture);
        }
        let stacked = std::mem::take(&mut self.group_state.stack);
        if !stacked.is_empty() {
            self.driver.bind_framebuffer(RenderTarget::Default);
        }
        for group in stacked {
            self.release_group(group);
        }
        self.release_cached_groups();
        self.driver.delete_texture(self.protected_texture.handle);
    }
}
