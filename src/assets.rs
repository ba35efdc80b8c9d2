// Asset loading - OBJ models via tobj, textures via image
//
// Everything is decoded on the CPU into MeshData / TextureData; nothing here
// touches the GPU.

use std::path::Path;

use crate::engine::SceneAssets;
use crate::error::{EngineError, EngineResult};
use crate::mesh::{MeshData, Vertex};
use crate::texture::TextureData;

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Load the configured model and texture; whichever path is missing falls
/// back to the built-in quad / white texel.
pub fn load_scene(model: Option<&Path>, texture: Option<&Path>) -> EngineResult<SceneAssets> {
    let builtin = SceneAssets::builtin();

    let meshes = match model {
        Some(path) => load_obj(path)?,
        None => {
            log::info!("No model configured, using the built-in quad");
            builtin.meshes
        }
    };

    let texture = match texture {
        Some(path) => load_texture(path)?,
        None => {
            log::info!("No texture configured, using a 1x1 white texture");
            builtin.texture
        }
    };

    Ok(SceneAssets { meshes, texture })
}

/// One MeshData per OBJ object, triangulated, identical vertices merged.
///
/// Vertex color comes from the file's per-vertex colors when present, else
/// white. Objects without texture coordinates get (0, 0).
pub fn load_obj(path: &Path) -> EngineResult<Vec<MeshData>> {
    let (models, materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .map_err(|e| EngineError::Asset(format!("failed to load {:?}: {}", path, e)))?;

    if let Err(e) = materials {
        log::debug!("Ignoring materials of {:?}: {}", path, e);
    }

    let mut meshes = Vec::with_capacity(models.len());
    for model in &models {
        let mesh = &model.mesh;
        if mesh.indices.is_empty() {
            log::warn!("Skipping object '{}' in {:?}: no faces", model.name, path);
            continue;
        }

        let stream = mesh
            .indices
            .iter()
            .map(|&i| obj_vertex(mesh, i as usize))
            .collect::<EngineResult<Vec<_>>>()?;

        let data = MeshData::from_vertex_stream(model.name.clone(), stream);
        log::info!(
            "Loaded '{}' from {:?}: {} indices, {} unique vertices",
            data.name,
            path,
            data.indices.len(),
            data.vertices.len()
        );
        meshes.push(data);
    }

    if meshes.is_empty() {
        return Err(EngineError::Asset(format!("{:?} contains no triangles", path)));
    }
    Ok(meshes)
}

fn obj_vertex(mesh: &tobj::Mesh, index: usize) -> EngineResult<Vertex> {
    let position = triple(&mesh.positions, index)
        .ok_or_else(|| EngineError::Asset(format!("position index {} out of range", index)))?;
    let color = triple(&mesh.vertex_color, index).unwrap_or(WHITE);
    let uv = match mesh.texcoords.get(2 * index..2 * index + 2) {
        Some(&[u, v]) => [u, v],
        _ => [0.0, 0.0],
    };
    Ok(Vertex::new(position, color, uv))
}

fn triple(values: &[f32], index: usize) -> Option<[f32; 3]> {
    match values.get(3 * index..3 * index + 3) {
        Some(&[x, y, z]) => Some([x, y, z]),
        _ => None,
    }
}

/// Decode any PNG/JPEG into tightly packed RGBA8.
pub fn load_texture(path: &Path) -> EngineResult<TextureData> {
    let image = image::open(path)
        .map_err(|e| EngineError::Asset(format!("failed to load {:?}: {}", path, e)))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    log::info!("Loaded texture {:?}: {}x{}", path, width, height);
    TextureData::new(width, height, image.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        path
    }

    const QUAD_OBJ: &str = "\
o quad
v -0.5 -0.5 0.0
v 0.5 -0.5 0.0
v 0.5 0.5 0.0
v -0.5 0.5 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
f 1/1 2/2 3/3 4/4
";

    #[test]
    fn quad_face_is_triangulated_and_shares_corners() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "quad.obj", QUAD_OBJ);

        let meshes = load_obj(&path).unwrap();

        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].name, "quad");
        assert_eq!(meshes[0].indices.len(), 6);
        assert_eq!(meshes[0].vertices.len(), 4);
        assert!(meshes[0].vertices.iter().all(|v| v.color == WHITE));
        meshes[0].validate().unwrap();
    }

    #[test]
    fn vertex_colors_are_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tri.obj",
            "v 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n",
        );

        let meshes = load_obj(&path).unwrap();

        let colors: Vec<[f32; 3]> = meshes[0].vertices.iter().map(|v| v.color).collect();
        assert_eq!(colors, vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(meshes[0].vertices.iter().all(|v| v.uv == [0.0, 0.0]));
    }

    #[test]
    fn missing_model_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = load_obj(&dir.path().join("nope.obj"));

        assert!(matches!(result, Err(EngineError::Asset(_))));
    }

    #[test]
    fn texture_is_converted_to_rgba8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        image::RgbImage::from_fn(3, 2, |x, _| image::Rgb([x as u8 * 100, 0, 255]))
            .save(&path)
            .unwrap();

        let texture = load_texture(&path).unwrap();

        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.pixels.len(), 3 * 2 * 4);
        assert_eq!(&texture.pixels[4..8], &[100, 0, 255, 255]);
    }

    #[test]
    fn unconfigured_scene_uses_builtins() {
        let scene = load_scene(None, None).unwrap();

        assert_eq!(scene.meshes.len(), 1);
        assert_eq!(scene.meshes[0].indices.len(), 6);
        assert_eq!(scene.texture.pixels, vec![255; 4]);
    }
}
