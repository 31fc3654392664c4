//! Loading shaders, models and textures from disk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use tessera_app::TextureData;
use tessera_core::{MeshData, Vertex};

/// Read a SPIR-V binary into words.
pub fn load_spirv(path: &Path) -> anyhow::Result<Vec<u32>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader {}", path.display()))?;
    ash::util::read_spv(&mut file).with_context(|| format!("Invalid SPIR-V in {}", path.display()))
}

fn obj_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

/// Load every shape of an OBJ file into one indexed mesh.
pub fn load_obj(path: &Path) -> anyhow::Result<MeshData> {
    let file =
        File::open(path).with_context(|| format!("Failed to open model {}", path.display()))?;
    let mesh = parse_obj(&mut BufReader::new(file))
        .with_context(|| format!("Failed to load model {}", path.display()))?;
    if mesh.vertices.is_empty() {
        bail!("Model {} contains no triangles", path.display());
    }

    tracing::info!(
        "Loaded {}: {} unique vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Parse OBJ text, ignoring any material library it names.
pub fn parse_obj(reader: &mut impl BufRead) -> anyhow::Result<MeshData> {
    let (models, _materials) =
        tobj::load_obj_buf(reader, &obj_options(), |_| Ok(Default::default()))
            .context("Failed to parse model")?;
    Ok(mesh_from_models(&models))
}

/// Flatten `models` into a single mesh with duplicate vertices merged.
///
/// Texture V is flipped since OBJ puts the origin at the bottom left.
/// Missing colors default to white and missing coordinates to zero; a face
/// without `vt` can leave the coordinate array shorter than the positions.
pub fn mesh_from_models(models: &[tobj::Model]) -> MeshData {
    let mut mesh = MeshData::default();
    // Keyed on the raw bits, as f32 is not `Eq`
    let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

    for model in models {
        let m = &model.mesh;
        for &index in &m.indices {
            let i = index as usize;

            let position = [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]];
            let color = match m.vertex_color.get(3 * i..3 * i + 3) {
                Some(&[r, g, b]) => [r, g, b],
                _ => [1.0, 1.0, 1.0],
            };
            let tex_coord = match m.texcoords.get(2 * i..2 * i + 2) {
                Some(&[u, v]) => [u, 1.0 - v],
                _ => [0.0, 0.0],
            };

            let vertex = Vertex {
                position,
                color,
                tex_coord,
            };
            let key: [u32; 8] = bytemuck::cast(vertex);

            let next = mesh.vertices.len() as u32;
            let slot = *unique.entry(key).or_insert(next);
            if slot == next {
                mesh.vertices.push(vertex);
            }
            mesh.indices.push(slot);
        }
    }

    mesh
}

/// Decode an image file to RGBA8.
pub fn load_texture(path: &Path) -> anyhow::Result<TextureData> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open texture {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    tracing::info!("Loaded {}: {}x{}", path.display(), width, height);
    Ok(TextureData {
        rgba: image.into_raw(),
        width,
        height,
    })
}

/// Square grey and white checkerboard with `cell`-texel squares.
pub fn checkerboard(size: u32, cell: u32) -> TextureData {
    let cell = cell.max(1);
    let rgba = (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 0xff } else { 0x60 };
            [v, v, v, 0xff]
        })
        .collect();

    TextureData {
        rgba,
        width: size,
        height: size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD_OBJ: &str = "\
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
";

    #[test]
    fn quad_is_triangulated_and_shared() {
        let mesh = parse_obj(&mut Cursor::new(QUAD_OBJ)).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn texture_v_is_flipped() {
        let mesh = parse_obj(&mut Cursor::new(QUAD_OBJ)).unwrap();
        let corner = mesh
            .vertices
            .iter()
            .find(|v| v.position == [-1.0, -1.0, 0.0])
            .unwrap();
        assert_eq!(corner.tex_coord, [0.0, 1.0]);
        assert_eq!(corner.color, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn repeated_faces_reuse_vertices() {
        let twice = format!("{QUAD_OBJ}f 1/1 2/2 3/3 4/4\n");
        let mesh = parse_obj(&mut Cursor::new(twice)).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 12);
        assert_eq!(mesh.indices[..6], mesh.indices[6..]);
    }

    #[test]
    fn faces_without_texture_coordinates_are_accepted() {
        let mixed = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 2 0 0
v 2 1 0
v 3 1 0
vt 0 0
vt 1 0
vt 1 1
f 1/1 2/2 3/3
f 1 3 4
f 3 4 5
";
        let mesh = parse_obj(&mut Cursor::new(mixed)).unwrap();
        assert_eq!(mesh.indices.len(), 9);
        assert!(mesh.validate().is_ok());

        let untextured = mesh
            .vertices
            .iter()
            .find(|v| v.position == [2.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(untextured.tex_coord, [0.0, 0.0]);
    }

    #[test]
    fn missing_model_file_is_an_error() {
        assert!(load_obj(Path::new("/nonexistent/model.obj")).is_err());
    }

    #[test]
    fn empty_obj_yields_empty_mesh() {
        let mesh = parse_obj(&mut Cursor::new("# nothing\n")).unwrap();
        assert!(mesh.vertices.is_empty());
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let texture = checkerboard(4, 2);
        assert_eq!(texture.rgba.len(), 4 * 4 * 4);

        let texel = |x: usize, y: usize| &texture.rgba[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_eq!(texel(2, 0), texel(0, 2));
        assert_eq!(texel(3, 3)[3], 0xff);
    }

    #[test]
    fn missing_shader_file_is_an_error() {
        assert!(load_spirv(Path::new("/nonexistent/shader.spv")).is_err());
    }
}
