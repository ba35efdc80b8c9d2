//! The device seam.
//!
//! Every engine component talks to the GPU through [`Gpu`]. Methods take and
//! return plain `ash::vk` handle values, so the same core code runs on the
//! real Vulkan device ([`crate::backend::VulkanDevice`]) and on the simulated
//! one ([`crate::null::NullGpu`]).
//!
//! Ownership rules live above this trait: whoever receives a handle from a
//! `create_*` call owns it and must hand it back through [`Gpu::destroy`]
//! exactly once.

use ash::vk;

use crate::error::EngineResult;
use crate::frame::ImageIndex;
use crate::recorder::Command;

/// Any destroyable object the engine can own.
///
/// Buffers and images carry their memory allocation implicitly: destroying
/// them also releases the backing allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuHandle {
    Buffer(vk::Buffer),
    Image(vk::Image),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    CommandPool(vk::CommandPool),
    DescriptorPool(vk::DescriptorPool),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    ShaderModule(vk::ShaderModule),
    Swapchain(vk::SwapchainKHR),
}

impl GpuHandle {
    /// Short kind name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            GpuHandle::Buffer(_) => "buffer",
            GpuHandle::Image(_) => "image",
            GpuHandle::ImageView(_) => "image view",
            GpuHandle::Sampler(_) => "sampler",
            GpuHandle::Semaphore(_) => "semaphore",
            GpuHandle::Fence(_) => "fence",
            GpuHandle::CommandPool(_) => "command pool",
            GpuHandle::DescriptorPool(_) => "descriptor pool",
            GpuHandle::DescriptorSetLayout(_) => "descriptor set layout",
            GpuHandle::PipelineLayout(_) => "pipeline layout",
            GpuHandle::Pipeline(_) => "pipeline",
            GpuHandle::ShaderModule(_) => "shader module",
            GpuHandle::Swapchain(_) => "swapchain",
        }
    }
}

/// Where an allocation should live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryIntent {
    /// Host-visible memory, written by the CPU and read by the GPU
    Upload,
    /// Device-local memory, only reachable through GPU transfers
    GpuOnly,
}

/// What the surface supports right now.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub intent: MemoryIntent,
}

#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
}

#[derive(Clone, Copy, Debug)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Everything needed to build the one fixed graphics pipeline.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub color_format: vk::Format,
    /// `None` disables depth test and depth write
    pub depth_format: Option<vk::Format>,
}

/// One queue submission of one command buffer.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: ImageIndex, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceLimits {
    pub max_sampler_anisotropy: f32,
}

/// Device operations used by the engine core.
///
/// All methods take `&self`; implementations guard their mutable state
/// (allocator, bookkeeping) internally.
pub trait Gpu {
    fn adapter_name(&self) -> &str;
    fn limits(&self) -> DeviceLimits;
    fn wait_idle(&self) -> EngineResult<()>;

    // Presentation
    fn surface_support(&self) -> EngineResult<SurfaceSupport>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> EngineResult<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> EngineResult<AcquireOutcome>;
    fn present(&self, swapchain: vk::SwapchainKHR, image: ImageIndex, wait: vk::Semaphore) -> EngineResult<PresentOutcome>;

    // Synchronization
    fn create_semaphore(&self) -> EngineResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> EngineResult<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence) -> EngineResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> EngineResult<()>;

    // Commands
    fn create_command_pool(&self) -> EngineResult<vk::CommandPool>;
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> EngineResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()>;
    /// Begin, encode `commands`, end.
    fn record(&self, command_buffer: vk::CommandBuffer, one_time: bool, commands: &[Command]) -> EngineResult<()>;
    fn submit(&self, submission: &Submission) -> EngineResult<()>;
    /// Submit with no semaphores and block until the GPU has finished it.
    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()>;

    // Memory
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, intent: MemoryIntent, name: &str) -> EngineResult<vk::Buffer>;
    /// Map, copy, unmap. Only valid for `MemoryIntent::Upload` buffers.
    fn write_buffer(&self, buffer: vk::Buffer, bytes: &[u8]) -> EngineResult<()>;
    fn create_image(&self, desc: &ImageDesc, name: &str) -> EngineResult<vk::Image>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> EngineResult<vk::ImageView>;

    // Shader resources
    fn create_sampler(&self, desc: &SamplerDesc) -> EngineResult<vk::Sampler>;
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> EngineResult<vk::DescriptorSetLayout>;
    fn create_descriptor_pool(&self, sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> EngineResult<vk::DescriptorPool>;
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> EngineResult<vk::DescriptorSet>;
    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler);

    // Pipeline
    fn create_shader_module(&self, words: &[u32]) -> EngineResult<vk::ShaderModule>;
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constant_size: u32) -> EngineResult<vk::PipelineLayout>;
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> EngineResult<vk::Pipeline>;

    /// Destroy one owned object (and its memory, for buffers and images).
    fn destroy(&self, handle: GpuHandle) -> EngineResult<()>;
}
