//! Value types shared between the compositor, the render engine and GPU drivers.
//!
//! Matrices are column-major `[f32; 16]` everywhere in the workspace; every
//! multiplication goes through [`multiply_matrices`] so the convention never
//! drifts between the projection, color-transform and texture paths.

mod mesh;

pub use mesh::{Mesh, Primitive};

slotmap::new_key_type! {
    pub struct TextureHandle;
    pub struct FramebufferHandle;
    pub struct ExternalImageHandle;
}

pub type TransformMatrix4x4 = [f32; 16];

/// Post-color matrix applied to fragment rgb; same layout as any other 4x4.
pub type ColorMatrix = TransformMatrix4x4;

pub const IDENTITY_MATRIX: TransformMatrix4x4 = [
    1.0, 0.0, 0.0, 0.0, // col0
    0.0, 1.0, 0.0, 0.0, // col1
    0.0, 0.0, 1.0, 0.0, // col2
    0.0, 0.0, 0.0, 1.0, // col3
];

/// Returns `left * right` for column-major matrices.
pub fn multiply_matrices(
    left: &TransformMatrix4x4,
    right: &TransformMatrix4x4,
) -> TransformMatrix4x4 {
    let mut product = [0.0f32; 16];
    for column in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += left[k * 4 + row] * right[column * 4 + k];
            }
            product[column * 4 + row] = sum;
        }
    }
    product
}

pub fn transform_point(matrix: &TransformMatrix4x4, point: [f32; 4]) -> [f32; 4] {
    let mut result = [0.0f32; 4];
    for (row, value) in result.iter_mut().enumerate() {
        *value = matrix[row] * point[0]
            + matrix[4 + row] * point[1]
            + matrix[8 + row] * point[2]
            + matrix[12 + row] * point[3];
    }
    result
}

pub fn is_identity(matrix: &TransformMatrix4x4) -> bool {
    *matrix == IDENTITY_MATRIX
}

/// Integer rectangle with a top-left origin; `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: i32::try_from(width).unwrap_or(i32::MAX),
            bottom: i32::try_from(height).unwrap_or(i32::MAX),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Intersection with `0..width` x `0..height`; empty rects collapse to default.
    pub fn clamp_to_size(&self, width: u32, height: u32) -> Rect {
        let bounds = Rect::from_size(width, height);
        let clamped = Rect {
            left: self.left.max(bounds.left),
            top: self.top.max(bounds.top),
            right: self.right.min(bounds.right),
            bottom: self.bottom.min(bounds.bottom),
        };
        if clamped.is_empty() {
            Rect::default()
        } else {
            clamped
        }
    }
}

/// Display orientation applied on top of the crop-to-viewport projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    pub const fn quarter_turns(self) -> u32 {
        match self {
            Rotation::Rot0 => 0,
            Rotation::Rot90 => 1,
            Rotation::Rot180 => 2,
            Rotation::Rot270 => 3,
        }
    }

    pub const fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Rot0),
            90 => Some(Rotation::Rot90),
            180 => Some(Rotation::Rot180),
            270 => Some(Rotation::Rot270),
            _ => None,
        }
    }

    pub const fn degrees(self) -> u32 {
        self.quarter_turns() * 90
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    #[default]
    Texture2d,
    /// Texture aliasing a platform image; sampled like a 2D texture.
    External,
}

/// A sampling source as seen by the render engine: a driver handle plus the
/// metadata the draw path needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Texture {
    pub handle: TextureHandle,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub filtering: bool,
    pub texture_matrix: TransformMatrix4x4,
}

impl Texture {
    pub fn new_2d(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            handle,
            target: TextureTarget::Texture2d,
            width,
            height,
            filtering: false,
            texture_matrix: IDENTITY_MATRIX,
        }
    }

    pub fn new_external(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            target: TextureTarget::External,
            ..Self::new_2d(handle, width, height)
        }
    }

    pub fn with_filtering(mut self, filtering: bool) -> Self {
        self.filtering = filtering;
        self
    }

    pub fn with_texture_matrix(mut self, texture_matrix: TransformMatrix4x4) -> Self {
        self.texture_matrix = texture_matrix;
        self
    }
}
