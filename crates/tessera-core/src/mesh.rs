//! Mesh data ready for upload.

use crate::error::{Error, Result};
use crate::types::Vertex;
use serde::{Deserialize, Serialize};

/// Flattened vertex array plus optional triangle indices.
///
/// An empty `indices` vector means the vertices are drawn in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a mesh from vertices and indices.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Two unit quads stacked half a unit apart along Z.
    pub fn demo_quads() -> Self {
        let corners = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ];

        let vertices = [0.0_f32, -0.5]
            .iter()
            .flat_map(|&z| {
                corners.iter().map(move |&([x, y], color, tex_coord)| Vertex {
                    position: [x, y, z],
                    color,
                    tex_coord,
                })
            })
            .collect();

        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }

    /// Whether the mesh is drawn with an index buffer.
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Number of vertices the draw call processes.
    pub fn draw_count(&self) -> u32 {
        if self.is_indexed() {
            self.indices.len() as u32
        } else {
            self.vertices.len() as u32
        }
    }

    /// Check that the mesh can be drawn as a triangle list.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(Error::EmptyMesh);
        }

        let count = if self.is_indexed() {
            self.indices.len()
        } else {
            self.vertices.len()
        };
        if count % 3 != 0 {
            return Err(Error::IncompleteTriangle(count));
        }

        if let Some((position, &index)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, &index)| index as usize >= self.vertices.len())
        {
            return Err(Error::IndexOutOfRange {
                index,
                position,
                vertex_count: self.vertices.len(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_quads_are_valid() {
        let mesh = MeshData::demo_quads();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.draw_count(), 12);
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.vertices[4].position, [-0.5, -0.5, -0.5]);
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let mut mesh = MeshData::demo_quads();
        mesh.indices[5] = 8;
        assert_eq!(
            mesh.validate(),
            Err(Error::IndexOutOfRange {
                index: 8,
                position: 5,
                vertex_count: 8,
            })
        );
    }

    #[test]
    fn empty_mesh_is_rejected() {
        assert_eq!(MeshData::default().validate(), Err(Error::EmptyMesh));
    }

    #[test]
    fn non_indexed_mesh_draws_every_vertex() {
        let mesh = MeshData::new(vec![Vertex::default(); 6], Vec::new());
        assert!(!mesh.is_indexed());
        assert_eq!(mesh.draw_count(), 6);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn partial_triangle_is_rejected() {
        let mesh = MeshData::new(vec![Vertex::default(); 4], vec![0, 1, 2, 3]);
        assert_eq!(mesh.validate(), Err(Error::IncompleteTriangle(4)));
    }
}
