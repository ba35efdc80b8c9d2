// Backend module - Vulkan implementation of the Gpu trait
//
// Design: Thin wrapper around ash; one file per concern, all of them adding
// inherent methods to VulkanDevice. The trait impl below only forwards.

mod commands;
mod device;
mod memory;
mod pipeline;
mod surface;
mod swapchain;
mod sync;

pub use device::{DeviceSettings, VulkanDevice};

use ash::vk;

use crate::error::EngineResult;
use crate::frame::ImageIndex;
use crate::gpu::{
    AcquireOutcome, DescriptorBinding, DeviceLimits, Gpu, GpuHandle, GraphicsPipelineDesc, ImageDesc, MemoryIntent,
    PresentOutcome, SamplerDesc, Submission, SurfaceSupport, SwapchainDesc,
};
use crate::recorder::Command;

impl Gpu for VulkanDevice {
    fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn surface_support(&self) -> EngineResult<SurfaceSupport> {
        self.query_surface_support()
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> EngineResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        self.create_swapchain_khr(desc)
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> EngineResult<AcquireOutcome> {
        self.acquire(swapchain, signal)
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image: ImageIndex, wait: vk::Semaphore) -> EngineResult<PresentOutcome> {
        self.queue_present(swapchain, image, wait)
    }

    fn create_semaphore(&self) -> EngineResult<vk::Semaphore> {
        self.new_semaphore()
    }

    fn create_fence(&self, signaled: bool) -> EngineResult<vk::Fence> {
        self.new_fence(signaled)
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> EngineResult<()> {
        self.wait_fence(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) -> EngineResult<()> {
        self.reset_fence_now(fence)
    }

    fn create_command_pool(&self) -> EngineResult<vk::CommandPool> {
        self.new_command_pool()
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> EngineResult<Vec<vk::CommandBuffer>> {
        self.new_command_buffers(pool, count)
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }?;
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, one_time: bool, commands: &[Command]) -> EngineResult<()> {
        self.encode(command_buffer, one_time, commands)
    }

    fn submit(&self, submission: &Submission) -> EngineResult<()> {
        self.queue_submit(submission)
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()> {
        self.queue_submit_and_wait(command_buffer)
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        intent: MemoryIntent,
        name: &str,
    ) -> EngineResult<vk::Buffer> {
        self.new_buffer(size, usage, intent, name)
    }

    fn write_buffer(&self, buffer: vk::Buffer, bytes: &[u8]) -> EngineResult<()> {
        self.fill_buffer(buffer, bytes)
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> EngineResult<vk::Image> {
        self.new_image(desc, name)
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> EngineResult<vk::ImageView> {
        self.new_image_view(image, format, aspect)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> EngineResult<vk::Sampler> {
        self.new_sampler(desc)
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> EngineResult<vk::DescriptorSetLayout> {
        self.new_descriptor_set_layout(bindings)
    }

    fn create_descriptor_pool(&self, sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> EngineResult<vk::DescriptorPool> {
        self.new_descriptor_pool(sizes, max_sets)
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> EngineResult<vk::DescriptorSet> {
        self.new_descriptor_set(pool, layout)
    }

    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler) {
        self.update_image_descriptor(set, binding, view, sampler)
    }

    fn create_shader_module(&self, words: &[u32]) -> EngineResult<vk::ShaderModule> {
        self.new_shader_module(words)
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constant_size: u32) -> EngineResult<vk::PipelineLayout> {
        self.new_pipeline_layout(set_layouts, push_constant_size)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> EngineResult<vk::Pipeline> {
        self.new_graphics_pipeline(desc)
    }

    fn destroy(&self, handle: GpuHandle) -> EngineResult<()> {
        log::trace!("Destroying {} {:?}", handle.kind(), handle);
        let device = &self.device;
        unsafe {
            match handle {
                GpuHandle::Buffer(buffer) => return self.destroy_buffer_and_memory(buffer),
                GpuHandle::Image(image) => return self.destroy_image_and_memory(image),
                GpuHandle::ImageView(view) => device.destroy_image_view(view, None),
                GpuHandle::Sampler(sampler) => device.destroy_sampler(sampler, None),
                GpuHandle::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                GpuHandle::Fence(fence) => device.destroy_fence(fence, None),
                GpuHandle::CommandPool(pool) => device.destroy_command_pool(pool, None),
                GpuHandle::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                GpuHandle::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout, None),
                GpuHandle::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                GpuHandle::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                GpuHandle::ShaderModule(module) => device.destroy_shader_module(module, None),
                GpuHandle::Swapchain(swapchain) => self.swapchain_loader.destroy_swapchain(swapchain, None),
            }
        }
        Ok(())
    }
}
