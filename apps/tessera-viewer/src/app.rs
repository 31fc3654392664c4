//! Viewer application implementation.

use std::path::PathBuf;
use std::sync::OnceLock;

use glam::{Mat4, Vec3};
use tracing::info;

use tessera_app::{AppContext, MeshApp, SceneDesc};
use tessera_core::{perspective_vk, MeshData, TransformUniforms};

use crate::assets;

/// Model spin speed in degrees per second.
const SPIN_DEGREES_PER_SECOND: f32 = 90.0;

/// Side length of the generated fallback texture.
const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

/// Viewer settings taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct ViewerOptions {
    pub model: Option<PathBuf>,
    pub texture: Option<PathBuf>,
    pub untextured: bool,
    /// Vertex and fragment SPIR-V replacing the built-in shaders.
    pub shaders: Option<(PathBuf, PathBuf)>,
}

static OPTIONS: OnceLock<ViewerOptions> = OnceLock::new();

/// Hand the command line settings to [`Viewer::init`].
///
/// Only the first call has any effect.
pub fn set_options(options: ViewerOptions) {
    let _ = OPTIONS.set(options);
}

/// Fixed camera looking at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Axis the model spins around.
    pub spin_axis: Vec3,
}

impl Camera {
    /// High above the model looking straight down, for loaded models.
    pub fn top_down() -> Self {
        Self {
            eye: Vec3::new(0.0, 10.0, 0.0),
            up: Vec3::NEG_Z,
            fov_y_degrees: 100.0,
            near: 0.1,
            far: 10.0,
            spin_axis: Vec3::Y,
        }
    }

    /// Looking down the diagonal at the XY plane, for the built-in quads.
    pub fn oblique() -> Self {
        Self {
            eye: Vec3::splat(2.0),
            up: Vec3::Z,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 10.0,
            spin_axis: Vec3::Z,
        }
    }

    /// Transform block after `seconds` of spinning.
    pub fn transforms(&self, seconds: f32, aspect: f32) -> TransformUniforms {
        let angle = (seconds * SPIN_DEGREES_PER_SECOND).to_radians();
        let model = Mat4::from_axis_angle(self.spin_axis, angle);
        let view = Mat4::look_at_rh(self.eye, Vec3::ZERO, self.up);
        let proj = perspective_vk(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        TransformUniforms::new(model, view, proj)
    }
}

/// Spinning mesh viewer.
pub struct Viewer {
    camera: Camera,
    elapsed: f32,
}

impl MeshApp for Viewer {
    fn init(_ctx: &AppContext) -> anyhow::Result<(Self, SceneDesc)> {
        let options = OPTIONS.get().cloned().unwrap_or_default();

        let (mesh, camera) = match &options.model {
            Some(path) => (assets::load_obj(path)?, Camera::top_down()),
            None => (MeshData::demo_quads(), Camera::oblique()),
        };

        let texture = if options.untextured {
            None
        } else {
            Some(match &options.texture {
                Some(path) => assets::load_texture(path)?,
                None => assets::checkerboard(CHECKER_SIZE, CHECKER_CELL),
            })
        };

        let (vertex_shader, fragment_shader) = match &options.shaders {
            Some((vert, frag)) => (assets::load_spirv(vert)?, assets::load_spirv(frag)?),
            None => {
                let fragment = if texture.is_some() {
                    tessera_shaders::textured_fragment_shader()
                } else {
                    tessera_shaders::color_fragment_shader()
                };
                (
                    tessera_shaders::mesh_vertex_shader().to_vec(),
                    fragment.to_vec(),
                )
            }
        };

        info!(
            "Scene: {} vertices, {}",
            mesh.vertices.len(),
            if texture.is_some() { "textured" } else { "vertex colors" }
        );

        let scene = SceneDesc {
            vertex_shader,
            fragment_shader,
            mesh,
            texture,
        };

        Ok((
            Self {
                camera,
                elapsed: 0.0,
            },
            scene,
        ))
    }

    fn update(&mut self, ctx: &AppContext, dt: f32) -> TransformUniforms {
        self.elapsed += dt;
        self.camera.transforms(self.elapsed, ctx.aspect_ratio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn mat(cols: [[f32; 4]; 4]) -> Mat4 {
        Mat4::from_cols_array_2d(&cols)
    }

    #[test]
    fn quarter_turn_after_one_second() {
        let ubo = Camera::top_down().transforms(1.0, 1.0);
        let x = mat(ubo.model) * Vec4::X;
        assert_relative_eq!(x.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(x.z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn model_starts_unrotated() {
        let ubo = Camera::oblique().transforms(0.0, 1.0);
        assert_eq!(mat(ubo.model), Mat4::IDENTITY);
    }

    #[test]
    fn top_down_view_maps_negative_z_to_up() {
        let ubo = Camera::top_down().transforms(0.0, 1.0);
        let p = mat(ubo.view) * Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, -10.0, epsilon = 1e-5);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        for camera in [Camera::top_down(), Camera::oblique()] {
            let ubo = camera.transforms(0.3, 4.0 / 3.0);
            let clip = mat(ubo.proj) * mat(ubo.view) * mat(ubo.model) * Vec4::W;
            assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
            assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
        }
    }
}
