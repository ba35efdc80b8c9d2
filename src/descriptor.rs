// Descriptors - the single combined image sampler binding
//
//   set 0, binding 0: COMBINED_IMAGE_SAMPLER (fragment stage)

use ash::vk;

use crate::error::EngineResult;
use crate::gpu::{DescriptorBinding, Gpu};
use crate::teardown::TeardownList;
use crate::texture::Texture;

pub const TEXTURE_BINDING: u32 = 0;

/// Layout, pool and the one set allocated from it.
#[derive(Clone, Copy, Debug)]
pub struct TextureBinding {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl TextureBinding {
    pub fn create<G: Gpu>(gpu: &G, owned: &mut TeardownList, texture: &Texture) -> EngineResult<Self> {
        let layout = owned.track(gpu.create_descriptor_set_layout(&[DescriptorBinding {
            binding: TEXTURE_BINDING,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stages: vk::ShaderStageFlags::FRAGMENT,
        }])?);

        // Sized for exactly one sampler descriptor in one set
        let pool = owned.track(gpu.create_descriptor_pool(
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            }],
            1,
        )?);

        // Freed together with the pool
        let set = gpu.allocate_descriptor_set(pool, layout)?;
        gpu.write_image_descriptor(set, TEXTURE_BINDING, texture.view, texture.sampler);

        log::info!("Descriptor set created (texture at binding {})", TEXTURE_BINDING);

        Ok(Self { layout, pool, set })
    }
}
