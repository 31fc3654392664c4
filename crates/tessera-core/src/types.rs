//! Vertex and uniform block layouts shared with shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A single vertex as laid out in GPU vertex buffers.
///
/// Shader input locations: 0 = position, 1 = color, 2 = texture coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a vertex from glam vectors.
    pub fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
            tex_coord: tex_coord.to_array(),
        }
    }

    /// Vertex with white color, for textured meshes.
    pub fn textured(position: Vec3, tex_coord: Vec2) -> Self {
        Self::new(position, Vec3::ONE, tex_coord)
    }
}

/// Model/view/projection block written into each frame's uniform buffer.
///
/// Matches a std140 `uniform` block of three `mat4`s.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TransformUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl TransformUniforms {
    /// Build the block from column-major matrices.
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

impl Default for TransformUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Right-handed perspective projection for Vulkan clip space.
///
/// Depth maps to `[0, 1]` and the Y axis is flipped, since Vulkan's
/// framebuffer Y points down.
pub fn perspective_vk(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
        assert_eq!(std::mem::offset_of!(Vertex, tex_coord), 24);
    }

    #[test]
    fn transform_block_is_three_mat4() {
        assert_eq!(std::mem::size_of::<TransformUniforms>(), 3 * 64);
    }

    #[test]
    fn perspective_flips_y() {
        let gl_style = Mat4::perspective_rh(1.0, 1.5, 0.1, 10.0);
        let vk_style = perspective_vk(1.0, 1.5, 0.1, 10.0);
        assert_relative_eq!(vk_style.y_axis.y, -gl_style.y_axis.y);
        assert_relative_eq!(vk_style.x_axis.x, gl_style.x_axis.x);
    }

    #[test]
    fn perspective_maps_near_plane_to_zero_depth() {
        let proj = perspective_vk(1.0, 1.0, 0.1, 10.0);
        let clip = proj * glam::Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(clip.z / clip.w, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn uniforms_are_column_major() {
        let translation = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let ubo = TransformUniforms::new(translation, Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(ubo.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(ubo.view, Mat4::IDENTITY.to_cols_array_2d());
    }
}
