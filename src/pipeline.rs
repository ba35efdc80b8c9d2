// Graphics pipeline - the one fixed pipeline the engine draws with
//
// Dynamic rendering (no render pass, no framebuffers). Viewport and scissor
// are dynamic state, so the pipeline survives swapchain recreation.

use ash::vk;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::gpu::{Gpu, GpuHandle, GraphicsPipelineDesc};
use crate::mesh::Vertex;
use crate::teardown::TeardownList;

/// One column-major 4x4 f32 matrix
pub const PUSH_CONSTANT_SIZE: u32 = 64;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
}

/// Read a SPIR-V blob into words.
///
/// Rejects missing files, lengths that are not a multiple of 4 and data
/// without the SPIR-V magic number.
pub fn load_shader_blob(path: &Path) -> EngineResult<Vec<u32>> {
    let shader_error = |source: io::Error| EngineError::ShaderBlob {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(shader_error)?;
    let words = ash::util::read_spv(&mut BufReader::new(file)).map_err(shader_error)?;

    log::debug!("Loaded shader {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Pipeline and its layout.
#[derive(Clone, Copy, Debug)]
pub struct FixedPipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl FixedPipeline {
    pub fn build<G: Gpu>(
        gpu: &G,
        owned: &mut TeardownList,
        settings: &PipelineSettings,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
    ) -> EngineResult<Self> {
        // Blobs first: a bad path fails before anything is created
        let vertex_words = load_shader_blob(&settings.vertex_shader)?;
        let fragment_words = load_shader_blob(&settings.fragment_shader)?;

        let layout = owned.track(gpu.create_pipeline_layout(&[set_layout], PUSH_CONSTANT_SIZE)?);

        let vertex_shader = gpu.create_shader_module(&vertex_words)?;
        let fragment_shader = match gpu.create_shader_module(&fragment_words) {
            Ok(module) => module,
            Err(e) => {
                gpu.destroy(GpuHandle::ShaderModule(vertex_shader))?;
                return Err(e);
            }
        };

        let desc = GraphicsPipelineDesc {
            vertex_shader,
            fragment_shader,
            layout,
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            cull_mode: vk::CullModeFlags::BACK,
            front_face: settings.front_face,
            color_format,
            depth_format: settings.depth_test.then_some(DEPTH_FORMAT),
        };
        let created = gpu.create_graphics_pipeline(&desc).map(|pipeline| owned.track(pipeline));

        // Modules are only needed while the pipeline is being built
        let vertex_destroyed = gpu.destroy(GpuHandle::ShaderModule(vertex_shader));
        let fragment_destroyed = gpu.destroy(GpuHandle::ShaderModule(fragment_shader));

        let pipeline = created?;
        vertex_destroyed.and(fragment_destroyed)?;

        log::info!(
            "Graphics pipeline created ({:?}, depth test {})",
            color_format,
            if settings.depth_test { "on" } else { "off" }
        );

        Ok(Self { layout, pipeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ResourceAllocator;
    use crate::null::NullGpu;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn write_blob(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    fn valid_blob() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn loads_valid_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(dir.path(), "ok.spv", &valid_blob());

        let words = load_shader_blob(&path).unwrap();

        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn rejects_missing_truncated_and_non_spirv_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut truncated = valid_blob();
        truncated.pop();
        let truncated = write_blob(dir.path(), "truncated.spv", &truncated);
        let garbage = write_blob(dir.path(), "garbage.spv", &[0xAB; 16]);
        let missing = dir.path().join("missing.spv");

        for path in [truncated, garbage, missing] {
            match load_shader_blob(&path) {
                Err(EngineError::ShaderBlob { path: reported, .. }) => assert_eq!(reported, path),
                other => panic!("expected ShaderBlob error for {:?}, got {:?}", path, other),
            }
        }
    }

    #[test]
    fn shader_modules_are_destroyed_after_build() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            vertex_shader: write_blob(dir.path(), "v.spv", &valid_blob()),
            fragment_shader: write_blob(dir.path(), "f.spv", &valid_blob()),
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
        };
        let gpu = NullGpu::new();
        let mut owned = TeardownList::new("pipeline");
        let set_layout = gpu.create_descriptor_set_layout(&[]).unwrap();

        let pipeline = FixedPipeline::build(&gpu, &mut owned, &settings, set_layout, vk::Format::B8G8R8A8_SRGB).unwrap();

        assert!(!gpu
            .live_handles()
            .iter()
            .any(|h| matches!(h, GpuHandle::ShaderModule(_))));
        let desc = gpu.last_pipeline_desc().unwrap();
        assert_eq!(desc.depth_format, Some(DEPTH_FORMAT));
        assert_eq!(desc.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(desc.vertex_attributes.len(), 3);
        assert_eq!(owned.handles(), vec![
            GpuHandle::PipelineLayout(pipeline.layout),
            GpuHandle::Pipeline(pipeline.pipeline),
        ]);

        owned.release(&gpu, &mut ResourceAllocator::new()).unwrap();
        gpu.destroy(GpuHandle::DescriptorSetLayout(set_layout)).unwrap();
        assert!(gpu.live_handles().is_empty());
    }

    #[test]
    fn pipeline_is_owned_even_when_module_destroy_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            vertex_shader: write_blob(dir.path(), "v.spv", &valid_blob()),
            fragment_shader: write_blob(dir.path(), "f.spv", &valid_blob()),
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
        };
        let gpu = NullGpu::new();
        let mut owned = TeardownList::new("pipeline");
        let set_layout = gpu.create_descriptor_set_layout(&[]).unwrap();

        gpu.fail_destroys_of(GpuHandle::ShaderModule(vk::ShaderModule::null()).kind());
        let result = FixedPipeline::build(&gpu, &mut owned, &settings, set_layout, vk::Format::B8G8R8A8_SRGB);

        assert!(matches!(result, Err(EngineError::Vulkan(_))));
        assert!(owned.handles().iter().any(|h| matches!(h, GpuHandle::Pipeline(_))));

        gpu.allow_destroys();
        owned.release(&gpu, &mut ResourceAllocator::new()).unwrap();
        let pipeline_alive = gpu
            .live_handles()
            .iter()
            .any(|h| matches!(h, GpuHandle::Pipeline(_) | GpuHandle::PipelineLayout(_)));
        assert!(!pipeline_alive);
    }
}
