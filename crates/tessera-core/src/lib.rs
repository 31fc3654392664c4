//! Core data types for the Tessera renderer.
//!
//! This crate holds the plain data shared between the GPU layer and
//! applications:
//! - The vertex record uploaded to vertex buffers
//! - The transform block written into per-frame uniform buffers
//! - Mesh data with index validation
//! - Common error types

pub mod error;
pub mod mesh;
pub mod types;

pub use error::{Error, Result};
pub use mesh::MeshData;
pub use types::{perspective_vk, TransformUniforms, Vertex};

/// Renderer-wide constants
pub mod constants {
    /// Default number of frames that may be in flight at once
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
    /// Upper bound on frames in flight
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
    /// Bytes per texel of an RGBA8 image
    pub const RGBA8_TEXEL_SIZE: usize = 4;
}
