// Shared fixtures for the scenario tests

use std::io::Write;
use std::path::Path;

use vk_engine::EngineConfig;

/// Smallest blob the shader loader accepts: the SPIR-V header words.
pub fn spirv_blob() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

pub fn write(path: &Path, bytes: &[u8]) {
    std::fs::File::create(path).unwrap().write_all(bytes).unwrap();
}

/// A temp dir holding both shader blobs, plus a config pointing at them.
pub fn shader_fixture() -> (tempfile::TempDir, EngineConfig) {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("shader.vert.spv"), &spirv_blob());
    write(&dir.path().join("shader.frag.spv"), &spirv_blob());

    let config = EngineConfig {
        vertex_shader: dir.path().join("shader.vert.spv"),
        fragment_shader: dir.path().join("shader.frag.spv"),
        ..EngineConfig::default()
    };
    (dir, config)
}
