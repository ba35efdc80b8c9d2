// Swapchain - Window presentation
//
// Raw KHR swapchain calls. Choosing format, mode, extent and image count is
// done by crate::swapchain; this file only talks to the driver.

use ash::vk;

use super::VulkanDevice;
use crate::error::EngineResult;
use crate::frame::ImageIndex;
use crate::gpu::{AcquireOutcome, PresentOutcome, SurfaceSupport, SwapchainDesc};

impl VulkanDevice {
    pub(super) fn query_surface_support(&self) -> EngineResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)?,
            })
        }
    }

    pub(super) fn create_swapchain_khr(&self, desc: &SwapchainDesc) -> EngineResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        // Images are touched by both queues when the families differ
        let family_indices = [self.queues.graphics, self.queues.present];
        let (sharing_mode, shared_families): (vk::SharingMode, &[u32]) = if self.queues.shared() {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { self.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        log::debug!("Driver returned {} swapchain images", images.len());
        Ok((swapchain, images))
    }

    /// Acquire next image for rendering
    pub(super) fn acquire(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> EngineResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                index: ImageIndex::new(index),
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen
    pub(super) fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image: ImageIndex,
        wait: vk::Semaphore,
    ) -> EngineResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image.get()];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
