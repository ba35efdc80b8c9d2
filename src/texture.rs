// Textures - RGBA8 pixel data, sampled image, view and sampler

use ash::vk;

use crate::allocator::ResourceAllocator;
use crate::error::{EngineError, EngineResult};
use crate::gpu::{Gpu, SamplerDesc};
use crate::teardown::TeardownList;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decoded texture: tightly packed RGBA8 rows.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> EngineResult<Self> {
        let texture = Self { width, height, pixels };
        texture.validate()?;
        Ok(texture)
    }

    /// 1x1 opaque white.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![255; 4],
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let expected = self.width as usize * self.height as usize * 4;
        if expected == 0 {
            return Err(EngineError::InvalidUpload(format!(
                "texture is {}x{}",
                self.width, self.height
            )));
        }
        if self.pixels.len() != expected {
            return Err(EngineError::InvalidUpload(format!(
                "texture {}x{} needs {} bytes, got {}",
                self.width,
                self.height,
                expected,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// A sampled texture on the GPU.
#[derive(Clone, Copy, Debug)]
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
}

impl Texture {
    /// Upload through a staging buffer; the image ends in SHADER_READ_ONLY_OPTIMAL.
    pub fn upload<G: Gpu>(
        gpu: &G,
        allocator: &mut ResourceAllocator,
        owned: &mut TeardownList,
        command_pool: vk::CommandPool,
        data: &TextureData,
    ) -> EngineResult<Self> {
        data.validate()?;

        let image = allocator.upload_image(gpu, command_pool, &data.pixels, data.extent(), TEXTURE_FORMAT, "texture")?;
        let image = owned.adopt_image(image);

        let view = owned.track(gpu.create_image_view(image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?);

        // Linear filtering, repeat, anisotropy at the device maximum
        let sampler = owned.track(gpu.create_sampler(&SamplerDesc {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(gpu.limits().max_sampler_anisotropy),
        })?);

        Ok(Self {
            image,
            view,
            sampler,
            extent: data.extent(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullGpu;

    #[test]
    fn pixel_count_must_match_extent() {
        assert!(TextureData::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            TextureData::new(2, 2, vec![0; 15]),
            Err(EngineError::InvalidUpload(_))
        ));
        assert!(matches!(
            TextureData::new(0, 4, Vec::new()),
            Err(EngineError::InvalidUpload(_))
        ));
    }

    #[test]
    fn upload_owns_image_view_and_sampler() {
        let gpu = NullGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let mut allocator = ResourceAllocator::new();
        let mut owned = TeardownList::new("texture");

        let texture = Texture::upload(&gpu, &mut allocator, &mut owned, pool, &TextureData::white()).unwrap();

        assert_eq!(owned.len(), 3);
        assert_eq!(texture.extent, vk::Extent2D { width: 1, height: 1 });

        owned.release(&gpu, &mut allocator).unwrap();
        assert_eq!(allocator.live_allocations(), 0);
    }
}
