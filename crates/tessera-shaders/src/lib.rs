//! Built-in shaders for the Tessera renderer.
//!
//! The GLSL sources under `shaders/` are compiled to SPIR-V at build time
//! using shaderc and embedded here. All three share one interface: a
//! transform block at binding 0, and for the textured variant a combined
//! image sampler at binding 1.

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static MESH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh_vert.spv"));
    pub static MESH_TEXTURED_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/mesh_textured_frag.spv"));
    pub static MESH_COLOR_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/mesh_color_frag.spv"));
}

/// Convert a byte slice to SPIR-V words.
///
/// Trailing bytes that do not fill a word are dropped; shaderc always
/// emits whole words.
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static MESH_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static MESH_TEXTURED_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static MESH_COLOR_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Vertex shader: transforms positions by `proj * view * model`.
pub fn mesh_vertex_shader() -> &'static [u32] {
    MESH_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MESH_VERT))
}

/// Fragment shader modulating the vertex color by the bound texture.
pub fn textured_fragment_shader() -> &'static [u32] {
    MESH_TEXTURED_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MESH_TEXTURED_FRAG))
}

/// Fragment shader writing the interpolated vertex color.
pub fn color_fragment_shader() -> &'static [u32] {
    MESH_COLOR_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MESH_COLOR_FRAG))
}
