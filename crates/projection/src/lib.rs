//! Crop-to-viewport projection with vertical flip and display rotation.
//!
//! Geometry handed to the engine lives in window coordinates of the target
//! surface (origin bottom-left, height `target_height`). The source crop is a
//! top-left-origin rectangle of the composed content; it is converted into
//! that space before the orthographic mapping.

use render_protocol::{Rect, Rotation, TransformMatrix4x4, multiply_matrices, transform_point};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("viewport must have a non-zero width and height")]
    InvalidViewport,
    #[error("source crop {0:?} is empty")]
    EmptySourceCrop(Rect),
}

const Y_FLIP_MATRIX: TransformMatrix4x4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportProjection {
    viewport_width: u32,
    viewport_height: u32,
    source_crop: Rect,
    target_height: u32,
    y_swap: bool,
    rotation: Rotation,
    matrix: TransformMatrix4x4,
}

impl ViewportProjection {
    pub fn new(
        viewport_width: u32,
        viewport_height: u32,
        source_crop: Rect,
        target_height: u32,
        y_swap: bool,
        rotation: Rotation,
    ) -> Result<Self, ProjectionError> {
        if viewport_width == 0 || viewport_height == 0 {
            return Err(ProjectionError::InvalidViewport);
        }
        if source_crop.is_empty() {
            return Err(ProjectionError::EmptySourceCrop(source_crop));
        }

        Ok(Self {
            viewport_width,
            viewport_height,
            source_crop,
            target_height,
            y_swap,
            rotation,
            matrix: compose_projection(source_crop, target_height, y_swap, rotation),
        })
    }

    pub fn viewport_width(&self) -> u32 {
        self.viewport_width
    }

    pub fn viewport_height(&self) -> u32 {
        self.viewport_height
    }

    pub fn source_crop(&self) -> Rect {
        self.source_crop
    }

    pub fn target_height(&self) -> u32 {
        self.target_height
    }

    pub fn y_swap(&self) -> bool {
        self.y_swap
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn matrix(&self) -> TransformMatrix4x4 {
        self.matrix
    }

    pub fn to_clip(&self, x: f32, y: f32) -> (f32, f32) {
        let clip = transform_point(&self.matrix, [x, y, 0.0, 1.0]);
        (clip[0] / clip[3], clip[1] / clip[3])
    }

    /// Maps a geometry point to viewport pixels (origin bottom-left).
    pub fn to_window(&self, x: f32, y: f32) -> (f32, f32) {
        let (clip_x, clip_y) = self.to_clip(x, y);
        (
            (clip_x + 1.0) * 0.5 * self.viewport_width as f32,
            (clip_y + 1.0) * 0.5 * self.viewport_height as f32,
        )
    }
}

/// `R(rotation) * F(y_swap) * Ortho(crop)`: the crop is scaled onto clip
/// space first, then optionally mirrored vertically, then rotated about the
/// viewport center in the destination's frame.
pub fn compose_projection(
    source_crop: Rect,
    target_height: u32,
    y_swap: bool,
    rotation: Rotation,
) -> TransformMatrix4x4 {
    let target_height = target_height as f32;
    let left = source_crop.left as f32;
    let right = source_crop.right as f32;
    let top = target_height - source_crop.top as f32;
    let bottom = target_height - source_crop.bottom as f32;

    let crop_to_clip = orthographic(left, right, bottom, top, 0.0, 1.0);
    let flipped = if y_swap {
        multiply_matrices(&Y_FLIP_MATRIX, &crop_to_clip)
    } else {
        crop_to_clip
    };
    multiply_matrices(&rotation_matrix(rotation), &flipped)
}

pub fn orthographic(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> TransformMatrix4x4 {
    let width = right - left;
    let height = top - bottom;
    let depth = far - near;
    [
        2.0 / width,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 / height,
        0.0,
        0.0,
        0.0,
        0.0,
        -2.0 / depth,
        0.0,
        -(right + left) / width,
        -(top + bottom) / height,
        -(far + near) / depth,
        1.0,
    ]
}

/// Counter-clockwise rotation about the z axis. Quarter turns are exact so
/// rotated bounds land on whole pixels.
pub fn rotation_matrix(rotation: Rotation) -> TransformMatrix4x4 {
    let (cosine, sine) = match rotation {
        Rotation::Rot0 => (1.0, 0.0),
        Rotation::Rot90 => (0.0, 1.0),
        Rotation::Rot180 => (-1.0, 0.0),
        Rotation::Rot270 => (0.0, -1.0),
    };
    [
        cosine, sine, 0.0, 0.0, //
        -sine, cosine, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0, //
    ]
}
