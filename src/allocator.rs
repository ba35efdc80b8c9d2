// Resource allocator - device buffers and images
//
// Callers ask for memory by intent (Upload / GpuOnly), never by memory type.
// Two upload paths exist:
//
//   buffers (vertex/index):  host-visible buffer -> map, copy, unmap
//   images (textures):       host-visible staging buffer
//                              -> one-shot command buffer:
//                                 UNDEFINED -> TRANSFER_DST, copy, -> SHADER_READ_ONLY
//                              -> submit + wait -> free staging
//
// Every allocation is recorded in a live ledger until freed, so teardown can
// prove nothing leaked.

use ash::vk;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::gpu::{Gpu, GpuHandle, ImageDesc, MemoryIntent};
use crate::recorder::{self, Command};

/// A device buffer plus its memory. Not `Clone`: exactly one owner frees it.
#[derive(Debug)]
pub struct AllocatedBuffer {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
}

impl AllocatedBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

/// A device image plus its memory. Not `Clone`: exactly one owner frees it.
#[derive(Debug)]
pub struct AllocatedImage {
    image: vk::Image,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl AllocatedImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

#[derive(Debug)]
struct LiveAllocation {
    name: String,
    bytes: u64,
}

/// Allocation bookkeeping on top of [`Gpu`] memory calls.
#[derive(Debug, Default)]
pub struct ResourceAllocator {
    live: HashMap<GpuHandle, LiveAllocation>,
    total_allocations: usize,
}

impl ResourceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer<G: Gpu>(
        &mut self,
        gpu: &G,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        intent: MemoryIntent,
        name: &str,
    ) -> EngineResult<AllocatedBuffer> {
        if size == 0 {
            return Err(EngineError::InvalidUpload(format!("buffer '{}' has zero size", name)));
        }

        let buffer = gpu.create_buffer(size, usage, intent, name)?;
        self.record(GpuHandle::Buffer(buffer), name, size);

        log::debug!("Allocated buffer '{}' ({} bytes, {:?})", name, size, intent);
        Ok(AllocatedBuffer { buffer, size })
    }

    pub fn create_image<G: Gpu>(&mut self, gpu: &G, desc: &ImageDesc, name: &str) -> EngineResult<AllocatedImage> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(EngineError::InvalidUpload(format!(
                "image '{}' has zero extent {}x{}",
                name, desc.extent.width, desc.extent.height
            )));
        }

        let image = gpu.create_image(desc, name)?;
        let bytes = desc.extent.width as u64 * desc.extent.height as u64 * 4;
        self.record(GpuHandle::Image(image), name, bytes);

        log::debug!(
            "Allocated image '{}' ({}x{} {:?})",
            name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(AllocatedImage {
            image,
            extent: desc.extent,
            format: desc.format,
        })
    }

    /// Host-visible buffer filled with `bytes`, consumed in place by the GPU.
    pub fn upload_buffer<G: Gpu>(
        &mut self,
        gpu: &G,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> EngineResult<AllocatedBuffer> {
        let buffer = self.create_buffer(gpu, bytes.len() as vk::DeviceSize, usage, MemoryIntent::Upload, name)?;

        if let Err(e) = gpu.write_buffer(buffer.handle(), bytes) {
            self.free_buffer(gpu, buffer)?;
            return Err(e);
        }

        Ok(buffer)
    }

    /// GPU-only sampled image filled from RGBA8 `pixels` through a staging buffer.
    ///
    /// Blocks until the copy has finished on the GPU.
    pub fn upload_image<G: Gpu>(
        &mut self,
        gpu: &G,
        command_pool: vk::CommandPool,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        name: &str,
    ) -> EngineResult<AllocatedImage> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if expected == 0 {
            return Err(EngineError::InvalidUpload(format!("image '{}' is empty", name)));
        }
        if pixels.len() != expected {
            return Err(EngineError::InvalidUpload(format!(
                "image '{}' is {}x{} but has {} bytes (expected {})",
                name,
                extent.width,
                extent.height,
                pixels.len(),
                expected
            )));
        }

        let staging = self.upload_buffer(
            gpu,
            pixels,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{} staging", name),
        )?;

        let image = match self.create_image(
            gpu,
            &ImageDesc {
                extent,
                format,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                intent: MemoryIntent::GpuOnly,
            },
            name,
        ) {
            Ok(image) => image,
            Err(e) => {
                self.free_buffer(gpu, staging)?;
                return Err(e);
            }
        };

        let commands = recorder::record_image_upload(staging.handle(), image.handle(), extent);
        let copied = submit_one_shot(gpu, command_pool, &commands);

        // Staging goes away whether or not the copy worked; submit_one_shot
        // has waited for the GPU either way.
        self.free_buffer(gpu, staging)?;

        match copied {
            Ok(()) => {
                log::info!("Uploaded image '{}' ({}x{})", name, extent.width, extent.height);
                Ok(image)
            }
            Err(e) => {
                self.free_image(gpu, image)?;
                Err(e)
            }
        }
    }

    pub fn free_buffer<G: Gpu>(&mut self, gpu: &G, buffer: AllocatedBuffer) -> EngineResult<()> {
        self.free(gpu, GpuHandle::Buffer(buffer.buffer))
    }

    pub fn free_image<G: Gpu>(&mut self, gpu: &G, image: AllocatedImage) -> EngineResult<()> {
        self.free(gpu, GpuHandle::Image(image.image))
    }

    /// The ledger entry goes only once the object is really gone.
    fn free<G: Gpu>(&mut self, gpu: &G, handle: GpuHandle) -> EngineResult<()> {
        if !self.live.contains_key(&handle) {
            return Err(EngineError::UnknownHandle(format!("{} {:?}", handle.kind(), handle)));
        }
        gpu.destroy(handle)?;
        self.forget(handle)
    }

    /// Buffers and images allocated but not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Allocations made over the allocator's lifetime, freed or not.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|a| a.bytes).sum()
    }

    /// Log anything still alive; returns the number of leaks.
    pub fn report_leaks(&self) -> usize {
        for (handle, allocation) in &self.live {
            log::warn!(
                "Leaked {} '{}' ({} bytes): {:?}",
                handle.kind(),
                allocation.name,
                allocation.bytes,
                handle
            );
        }
        self.live.len()
    }

    fn record(&mut self, handle: GpuHandle, name: &str, bytes: u64) {
        self.live.insert(
            handle,
            LiveAllocation {
                name: name.to_string(),
                bytes,
            },
        );
        self.total_allocations += 1;
    }

    fn forget(&mut self, handle: GpuHandle) -> EngineResult<()> {
        match self.live.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownHandle(format!("{} {:?}", handle.kind(), handle))),
        }
    }
}

/// Record `commands` into a temporary command buffer, submit and wait.
pub fn submit_one_shot<G: Gpu>(gpu: &G, command_pool: vk::CommandPool, commands: &[Command]) -> EngineResult<()> {
    let command_buffer = gpu
        .allocate_command_buffers(command_pool, 1)?
        .into_iter()
        .next()
        .ok_or(EngineError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;

    let result = gpu
        .record(command_buffer, true, commands)
        .and_then(|()| gpu.submit_and_wait(command_buffer));

    gpu.free_command_buffer(command_pool, command_buffer);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullGpu;

    #[test]
    fn upload_buffer_writes_bytes_host_visible() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();

        let buffer = allocator
            .upload_buffer(&gpu, &[9, 8, 7, 6], vk::BufferUsageFlags::INDEX_BUFFER, "indices")
            .unwrap();

        assert_eq!(gpu.buffer_contents(buffer.handle()), Some(vec![9, 8, 7, 6]));
        assert_eq!(gpu.buffer_intent(buffer.handle()), Some(MemoryIntent::Upload));
        assert_eq!(allocator.live_allocations(), 1);

        allocator.free_buffer(&gpu, buffer).unwrap();
        assert_eq!(allocator.live_allocations(), 0);
        assert!(gpu.live_handles().is_empty());
    }

    #[test]
    fn failed_destroy_keeps_the_ledger_entry() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let buffer = allocator
            .upload_buffer(&gpu, &[1, 2, 3, 4], vk::BufferUsageFlags::VERTEX_BUFFER, "vertices")
            .unwrap();
        let handle = buffer.handle();

        gpu.fail_destroys_of(GpuHandle::Buffer(handle).kind());
        assert!(allocator.free_buffer(&gpu, buffer).is_err());
        assert_eq!(allocator.live_allocations(), 1);
        assert_eq!(gpu.live_handles(), vec![GpuHandle::Buffer(handle)]);
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();

        let result = allocator.upload_buffer(&gpu, &[], vk::BufferUsageFlags::VERTEX_BUFFER, "empty");

        assert!(matches!(result, Err(EngineError::InvalidUpload(_))));
        assert_eq!(allocator.total_allocations(), 0);
    }

    #[test]
    fn upload_image_frees_staging_and_submits_once() {
        let gpu = NullGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let mut allocator = ResourceAllocator::new();

        let image = allocator
            .upload_image(
                &gpu,
                pool,
                &[255; 4],
                vk::Extent2D { width: 1, height: 1 },
                vk::Format::R8G8B8A8_SRGB,
                "white",
            )
            .unwrap();

        // Staging buffer is gone, only the image is alive
        assert_eq!(allocator.live_allocations(), 1);
        assert_eq!(allocator.total_allocations(), 2);
        assert_eq!(gpu.one_shot_submissions(), 1);
        assert!(gpu.live_handles().contains(&GpuHandle::Image(image.handle())));

        allocator.free_image(&gpu, image).unwrap();
        gpu.destroy(GpuHandle::CommandPool(pool)).unwrap();
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn upload_image_rejects_wrong_pixel_count() {
        let gpu = NullGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let mut allocator = ResourceAllocator::new();

        let result = allocator.upload_image(
            &gpu,
            pool,
            &[255; 12],
            vk::Extent2D { width: 2, height: 2 },
            vk::Format::R8G8B8A8_SRGB,
            "short",
        );

        assert!(matches!(result, Err(EngineError::InvalidUpload(_))));
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn freeing_unknown_buffer_is_an_error() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let mut other = ResourceAllocator::new();

        let buffer = other
            .create_buffer(&gpu, 16, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryIntent::Upload, "foreign")
            .unwrap();

        assert!(matches!(
            allocator.free_buffer(&gpu, buffer),
            Err(EngineError::UnknownHandle(_))
        ));
    }
}
