/// Vertex assembly for a [`Mesh`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Primitive {
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// 2D geometry consumed by `draw_mesh`. Positions are in the coordinate space
/// the active projection maps from; texture coordinates are optional and,
/// when present, pair one-to-one with positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    primitive: Primitive,
    positions: Vec<[f32; 2]>,
    tex_coords: Option<Vec<[f32; 2]>>,
}

impl Mesh {
    pub fn new(primitive: Primitive, positions: Vec<[f32; 2]>) -> Self {
        Self {
            primitive,
            positions,
            tex_coords: None,
        }
    }

    pub fn with_tex_coords(mut self, tex_coords: Vec<[f32; 2]>) -> Self {
        self.tex_coords = Some(tex_coords);
        self
    }

    /// Fan covering `(0, 0)..(width, height)` with texture coordinates spanning the unit square.
    pub fn textured_quad(width: f32, height: f32) -> Self {
        Self::new(
            Primitive::TriangleFan,
            vec![[0.0, 0.0], [width, 0.0], [width, height], [0.0, height]],
        )
        .with_tex_coords(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    pub fn tex_coords(&self) -> Option<&[[f32; 2]]> {
        self.tex_coords.as_deref()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Vertex indices expanded to an independent triangle list.
    pub fn triangle_list_indices(&self) -> Vec<usize> {
        let count = self.positions.len();
        match self.primitive {
            Primitive::Triangles => (0..count - count % 3).collect(),
            Primitive::TriangleStrip => {
                let mut indices = Vec::with_capacity(count.saturating_sub(2) * 3);
                for first in 0..count.saturating_sub(2) {
                    if first % 2 == 0 {
                        indices.extend([first, first + 1, first + 2]);
                    } else {
                        indices.extend([first + 1, first, first + 2]);
                    }
                }
                indices
            }
            Primitive::TriangleFan => {
                let mut indices = Vec::with_capacity(count.saturating_sub(2) * 3);
                for second in 1..count.saturating_sub(1) {
                    indices.extend([0, second, second + 1]);
                }
                indices
            }
        }
    }
}
