//! `MeshApp` trait definition.

use tessera_core::{MeshData, TransformUniforms};
use winit::event::WindowEvent;

use crate::context::AppContext;

/// RGBA8 texels plus dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Everything the renderer needs to draw an application's scene.
#[derive(Debug, Clone)]
pub struct SceneDesc {
    /// SPIR-V words of the vertex shader.
    pub vertex_shader: Vec<u32>,
    /// SPIR-V words of the fragment shader.
    pub fragment_shader: Vec<u32>,
    pub mesh: MeshData,
    /// Sampled at binding 1 when present.
    pub texture: Option<TextureData>,
}

/// Trait for Tessera applications.
///
/// The framework owns the window, device, swapchain and frame loop; the
/// application supplies the scene once and a transform block every frame.
pub trait MeshApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, device and swapchain exist. The returned
    /// scene is uploaded before the first frame.
    fn init(ctx: &AppContext) -> anyhow::Result<(Self, SceneDesc)>;

    /// Advance by `dt` seconds and return this frame's transforms.
    fn update(&mut self, ctx: &AppContext, dt: f32) -> TransformUniforms;

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further. Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }
}
