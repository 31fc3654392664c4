//! Application framework for the Tessera renderer.
//!
//! This crate handles the boilerplate around `tessera-gpu`:
//! - Logging setup
//! - Configuration, optionally read from TOML
//! - Window creation and the winit event loop
//! - Device, swapchain and renderer construction and teardown
//! - Driving one frame per redraw and stopping on the first failure
//!
//! # Example
//!
//! ```no_run
//! use tessera_app::{run_app, AppConfig, AppContext, MeshApp, SceneDesc};
//! use tessera_core::{MeshData, TransformUniforms};
//!
//! struct Still;
//!
//! impl MeshApp for Still {
//!     fn init(_ctx: &AppContext) -> anyhow::Result<(Self, SceneDesc)> {
//!         let scene = SceneDesc {
//!             vertex_shader: Vec::new(),
//!             fragment_shader: Vec::new(),
//!             mesh: MeshData::demo_quads(),
//!             texture: None,
//!         };
//!         Ok((Still, scene))
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) -> TransformUniforms {
//!         TransformUniforms::default()
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<Still>(AppConfig::default())
//! }
//! ```

mod app;
mod config;
mod context;
mod renderer;
mod runner;

pub use app::{MeshApp, SceneDesc, TextureData};
pub use config::AppConfig;
pub use context::AppContext;
pub use renderer::{MeshBuffers, Renderer};
pub use runner::{init_logging, run_app};

// Re-export commonly used types for convenience
pub use tessera_gpu::{DeviceContext, DeviceContextBuilder};
pub use winit::event::WindowEvent;
