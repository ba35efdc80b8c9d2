// Buffers and images backed by gpu-allocator
//
// Every buffer/image gets its own Allocation, kept in `allocations` under the
// resource's handle and freed when the resource is destroyed.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};
use crate::gpu::{GpuHandle, ImageDesc, MemoryIntent};

fn memory_location(intent: MemoryIntent) -> MemoryLocation {
    match intent {
        MemoryIntent::Upload => MemoryLocation::CpuToGpu,
        MemoryIntent::GpuOnly => MemoryLocation::GpuOnly,
    }
}

impl VulkanDevice {
    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        intent: MemoryIntent,
        linear: bool,
    ) -> EngineResult<Allocation> {
        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location(intent),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    fn free_allocation(&self, handle: GpuHandle) -> EngineResult<()> {
        let allocation = self
            .allocations
            .lock()
            .remove(&handle)
            .ok_or_else(|| EngineError::UnknownHandle(format!("{} {:?}", handle.kind(), handle)))?;
        self.allocator.lock().free(allocation)?;
        Ok(())
    }

    pub(super) fn new_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        intent: MemoryIntent,
        name: &str,
    ) -> EngineResult<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let bound = self.allocate(name, requirements, intent, true).and_then(|allocation| {
            let bind = unsafe {
                self.device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            };
            match bind {
                Ok(()) => Ok(allocation),
                Err(e) => {
                    self.allocator.lock().free(allocation)?;
                    Err(e.into())
                }
            }
        });

        match bound {
            Ok(allocation) => {
                self.allocations.lock().insert(GpuHandle::Buffer(buffer), allocation);
                log::debug!("Buffer '{}' created: {} bytes, {:?}", name, size, intent);
                Ok(buffer)
            }
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    pub(super) fn fill_buffer(&self, buffer: vk::Buffer, bytes: &[u8]) -> EngineResult<()> {
        let mut allocations = self.allocations.lock();
        let allocation = allocations
            .get_mut(&GpuHandle::Buffer(buffer))
            .ok_or_else(|| EngineError::UnknownHandle(format!("buffer {:?}", buffer)))?;

        let mapped = allocation
            .mapped_slice_mut()
            .ok_or_else(|| EngineError::InvalidUpload("buffer is not host visible".to_string()))?;
        if bytes.len() > mapped.len() {
            return Err(EngineError::InvalidUpload(format!(
                "{} bytes do not fit in a {} byte allocation",
                bytes.len(),
                mapped.len()
            )));
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(super) fn new_image(&self, desc: &ImageDesc, name: &str) -> EngineResult<vk::Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { self.device.create_image(&image_info, None) }?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let bound = self.allocate(name, requirements, desc.intent, false).and_then(|allocation| {
            let bind = unsafe {
                self.device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            };
            match bind {
                Ok(()) => Ok(allocation),
                Err(e) => {
                    self.allocator.lock().free(allocation)?;
                    Err(e.into())
                }
            }
        });

        match bound {
            Ok(allocation) => {
                self.allocations.lock().insert(GpuHandle::Image(image), allocation);
                log::debug!(
                    "Image '{}' created: {}x{} {:?}",
                    name,
                    desc.extent.width,
                    desc.extent.height,
                    desc.format
                );
                Ok(image)
            }
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    pub(super) fn new_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> EngineResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        Ok(unsafe { self.device.create_image_view(&create_info, None) }?)
    }

    /// Destroy the buffer, then return its memory to the allocator.
    pub(super) fn destroy_buffer_and_memory(&self, buffer: vk::Buffer) -> EngineResult<()> {
        let handle = GpuHandle::Buffer(buffer);
        if !self.allocations.lock().contains_key(&handle) {
            return Err(EngineError::UnknownHandle(format!("buffer {:?}", buffer)));
        }
        unsafe { self.device.destroy_buffer(buffer, None) };
        self.free_allocation(handle)
    }

    pub(super) fn destroy_image_and_memory(&self, image: vk::Image) -> EngineResult<()> {
        let handle = GpuHandle::Image(image);
        if !self.allocations.lock().contains_key(&handle) {
            return Err(EngineError::UnknownHandle(format!("image {:?}", image)));
        }
        unsafe { self.device.destroy_image(image, None) };
        self.free_allocation(handle)
    }
}
