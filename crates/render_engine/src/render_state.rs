//! Per-draw composition state.
//!
//! Every `setup_*` call rewrites one axis; the state persists across draws.
//! When axes conflict at draw time the resolved source follows
//! blacked-out > masking > texturing > fill.

use render_protocol::{ColorMatrix, IDENTITY_MATRIX, Texture, TextureHandle, TransformMatrix4x4};

use crate::driver::{BlendFunc, DrawDescription, LayerMask};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TexturingSource {
    None,
    Texture(Texture),
    BlackedOut,
}

/// What the next draw samples from, after precedence is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawSource {
    BlackedOut,
    Texture(TextureHandle),
    Fill([f32; 4]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    blend: Option<BlendFunc>,
    premultiplied_alpha: bool,
    opaque: bool,
    plane_alpha: f32,
    source: TexturingSource,
    mask: Option<LayerMask>,
    color: [f32; 4],
    color_matrix: ColorMatrix,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: None,
            premultiplied_alpha: false,
            opaque: true,
            plane_alpha: 1.0,
            source: TexturingSource::None,
            mask: None,
            color: [0.0, 0.0, 0.0, 0.0],
            color_matrix: IDENTITY_MATRIX,
        }
    }
}

impl RenderState {
    pub fn blend(&self) -> Option<BlendFunc> {
        self.blend
    }

    pub fn blending_enabled(&self) -> bool {
        self.blend.is_some()
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    pub fn opaque(&self) -> bool {
        self.opaque
    }

    pub fn plane_alpha(&self) -> f32 {
        self.plane_alpha
    }

    pub fn source(&self) -> TexturingSource {
        self.source
    }

    pub fn mask(&self) -> Option<LayerMask> {
        self.mask
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn color_matrix(&self) -> ColorMatrix {
        self.color_matrix
    }

    pub fn effective_source(&self) -> DrawSource {
        match self.source {
            TexturingSource::BlackedOut => DrawSource::BlackedOut,
            TexturingSource::Texture(texture) => DrawSource::Texture(texture.handle),
            TexturingSource::None => DrawSource::Fill(self.color),
        }
    }

    /// Textures the next draw will sample, mask included.
    pub(crate) fn sampled_textures(&self) -> impl Iterator<Item = Texture> + '_ {
        let texture = match self.source {
            TexturingSource::Texture(texture) => Some(texture),
            _ => None,
        };
        let mask = match self.source {
            TexturingSource::BlackedOut => None,
            _ => self.mask.map(|mask| mask.texture),
        };
        texture.into_iter().chain(mask)
    }

    pub(crate) fn set_layer_blending(
        &mut self,
        premultiplied_alpha: bool,
        opaque: bool,
        alpha: u8,
    ) {
        self.plane_alpha = f32::from(alpha) / 255.0;
        self.premultiplied_alpha = premultiplied_alpha;
        self.opaque = opaque;
        self.blend = if alpha < u8::MAX || !opaque {
            Some(if premultiplied_alpha {
                BlendFunc::PREMULTIPLIED_OVER
            } else {
                BlendFunc::STRAIGHT_OVER
            })
        } else {
            None
        };
    }

    pub(crate) fn set_dim_layer_blending(&mut self, alpha: u8) {
        self.plane_alpha = 1.0;
        self.premultiplied_alpha = true;
        self.opaque = false;
        self.color = [0.0, 0.0, 0.0, f32::from(alpha) / 255.0];
        self.source = TexturingSource::None;
        self.blend = if alpha == u8::MAX {
            None
        } else {
            Some(BlendFunc::PREMULTIPLIED_OVER)
        };
    }

    pub(crate) fn set_texture(&mut self, texture: Texture) {
        self.source = TexturingSource::Texture(texture);
    }

    pub(crate) fn set_blacked_out(&mut self) {
        self.source = TexturingSource::BlackedOut;
    }

    pub(crate) fn set_fill_color(&mut self, color: [f32; 4]) {
        self.plane_alpha = 1.0;
        self.premultiplied_alpha = true;
        self.opaque = false;
        self.color = color;
        self.source = TexturingSource::None;
        self.blend = None;
    }

    pub(crate) fn replace_color_matrix(&mut self, color_matrix: ColorMatrix) -> ColorMatrix {
        std::mem::replace(&mut self.color_matrix, color_matrix)
    }

    pub(crate) fn clear_texture(&mut self) {
        self.source = TexturingSource::None;
    }

    pub(crate) fn clear_blend(&mut self) {
        self.blend = None;
    }

    pub(crate) fn set_mask(&mut self, texture: Texture, alpha_threshold: f32) {
        self.mask = Some(LayerMask {
            texture,
            alpha_threshold,
        });
    }

    pub(crate) fn clear_mask(&mut self) {
        self.mask = None;
    }

    /// State used to composite a finished group onto its parent target.
    pub(crate) fn for_group_composite(texture: Texture, color_transform: ColorMatrix) -> Self {
        Self {
            blend: None,
            premultiplied_alpha: true,
            opaque: false,
            plane_alpha: 1.0,
            source: TexturingSource::Texture(texture),
            mask: None,
            color: [0.0, 0.0, 0.0, 0.0],
            color_matrix: color_transform,
        }
    }

    pub(crate) fn describe(
        &self,
        projection: TransformMatrix4x4,
        protected_texture: &Texture,
    ) -> DrawDescription {
        let (texture, mask) = match self.source {
            TexturingSource::BlackedOut => (Some(*protected_texture), None),
            TexturingSource::Texture(texture) => (Some(texture), self.mask),
            TexturingSource::None => (None, self.mask),
        };
        let color_matrix = if render_protocol::is_identity(&self.color_matrix) {
            None
        } else {
            Some(self.color_matrix)
        };
        DrawDescription {
            projection,
            texture,
            mask,
            color: self.color,
            plane_alpha: self.plane_alpha,
            premultiplied_alpha: self.premultiplied_alpha,
            opaque: self.opaque,
            color_matrix,
        }
    }
}
