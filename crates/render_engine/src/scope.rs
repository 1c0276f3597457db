//! Guards that close a group or release an external target on every exit path.
//!
//! Both guards deref to the engine, so drawing (and nesting further scopes)
//! goes through the guard while it is alive. Errors from an explicit `end` /
//! `finish` are returned; errors while dropping can only be logged.

use std::ops::{Deref, DerefMut};

use render_protocol::{ColorMatrix, ExternalImageHandle};
use tracing::warn;

use crate::{
    ContractViolation, EngineError, FramebufferStatus, ImageBinding, ReadbackPixels, RenderEngine,
};

/// Ends the group it began, and only that group: the stack must be back at
/// the depth the scope left it at, otherwise the scope refuses to pop.
pub struct GroupScope<'a, E: RenderEngine + ?Sized> {
    engine: &'a mut E,
    depth: usize,
    ended: bool,
}

impl<'a, E: RenderEngine + ?Sized> GroupScope<'a, E> {
    pub fn begin(engine: &'a mut E, color_transform: &ColorMatrix) -> Result<Self, EngineError> {
        engine.begin_group(color_transform)?;
        let depth = engine.group_depth();
        Ok(Self {
            engine,
            depth,
            ended: false,
        })
    }

    pub fn end(mut self) -> Result<(), EngineError> {
        self.ended = true;
        self.end_own_group()
    }

    fn end_own_group(&mut self) -> Result<(), EngineError> {
        let actual = self.engine.group_depth();
        if actual != self.depth {
            return Err(ContractViolation::GroupScopeMismatch {
                expected: self.depth,
                actual,
            }
            .into());
        }
        self.engine.end_group()
    }
}

impl<E: RenderEngine + ?Sized> Deref for GroupScope<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: RenderEngine + ?Sized> DerefMut for GroupScope<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: RenderEngine + ?Sized> Drop for GroupScope<'_, E> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(error) = self.end_own_group() {
            warn!(%error, "group scope failed to end its group");
        }
    }
}

pub struct ImageTargetScope<'a, E: RenderEngine + ?Sized> {
    engine: &'a mut E,
    binding: ImageBinding,
    released: bool,
}

impl<'a, E: RenderEngine + ?Sized> ImageTargetScope<'a, E> {
    pub fn bind(
        engine: &'a mut E,
        image: ExternalImageHandle,
        use_read_pixels: bool,
        req_width: u32,
        req_height: u32,
    ) -> Result<Self, EngineError> {
        let binding =
            engine.bind_image_as_framebuffer(image, use_read_pixels, req_width, req_height)?;
        Ok(Self {
            engine,
            binding,
            released: false,
        })
    }

    pub fn binding(&self) -> ImageBinding {
        self.binding
    }

    pub fn status(&self) -> FramebufferStatus {
        self.binding.status
    }

    pub fn finish(mut self) -> Result<Option<ReadbackPixels>, EngineError> {
        self.released = true;
        self.engine.unbind_framebuffer(self.binding)
    }
}

impl<E: RenderEngine + ?Sized> Deref for ImageTargetScope<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: RenderEngine + ?Sized> DerefMut for ImageTargetScope<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: RenderEngine + ?Sized> Drop for ImageTargetScope<'_, E> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.engine.unbind_framebuffer(self.binding) {
            warn!(%error, "image target scope failed to release its binding");
        }
    }
}
