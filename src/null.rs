//! Simulated GPU.
//!
//! [`NullGpu`] implements [`Gpu`] without a driver. It hands out unique fake
//! handles and models just enough device behavior to check the engine's
//! protocol:
//!
//! - fences: signaled / unsignaled / pending; a pending fence completes when
//!   the CPU waits on it (or on the whole device)
//! - semaphores: unsignaled / signaled / held by a presentation of image K,
//!   released when image K is acquired again
//! - presentation engine: round-robin image acquisition, out-of-date after a
//!   surface resize
//! - command buffers: in flight from submit until their fence completes
//!
//! Protocol mistakes (re-recording an in-flight command buffer, signaling a
//! semaphore that is still in use, destroying an unknown handle, ...) are
//! logged and collected as violations for tests to assert on.

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{self, AdapterFeatures, AdapterInfo, QueueFamilyInfo};
use crate::error::{EngineError, EngineResult};
use crate::frame::ImageIndex;
use crate::gpu::{
    AcquireOutcome, DescriptorBinding, DeviceLimits, Gpu, GpuHandle, GraphicsPipelineDesc, ImageDesc, MemoryIntent,
    PresentOutcome, SamplerDesc, Submission, SurfaceSupport, SwapchainDesc,
};
use crate::recorder::Command;

/// Shape of the simulated adapter and surface.
#[derive(Clone, Debug)]
pub struct NullGpuConfig {
    pub adapters: Vec<AdapterInfo>,
    pub min_image_count: u32,
    /// 0 means no limit
    pub max_image_count: u32,
    /// `None` reports an undefined current extent (`u32::MAX`), leaving the
    /// choice to the framebuffer size
    pub surface_extent: Option<vk::Extent2D>,
    pub min_image_extent: vk::Extent2D,
    pub max_image_extent: vk::Extent2D,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub max_sampler_anisotropy: f32,
}

impl Default for NullGpuConfig {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterInfo {
                name: "Null Device".to_string(),
                device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
                queue_families: vec![QueueFamilyInfo {
                    graphics: true,
                    present: true,
                }],
                features: AdapterFeatures::ALL,
            }],
            min_image_count: 2,
            max_image_count: 0,
            surface_extent: None,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            max_sampler_anisotropy: 16.0,
        }
    }
}

/// One successful presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub swapchain: vk::SwapchainKHR,
    pub image: ImageIndex,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted work not yet observed as complete
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SemaphoreState {
    Unsignaled,
    Signaled,
    /// Waited on by a presentation of this image; free once it is re-acquired
    HeldByPresent(vk::SwapchainKHR, u32),
}

#[derive(Debug)]
struct CommandBufferState {
    pool: vk::CommandPool,
    recorded: bool,
    in_flight: Option<vk::Fence>,
}

#[derive(Debug)]
struct SimBuffer {
    size: vk::DeviceSize,
    intent: MemoryIntent,
    contents: Vec<u8>,
}

#[derive(Debug)]
struct SimSwapchain {
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    held: Vec<bool>,
    next: usize,
    out_of_date: bool,
}

#[derive(Default)]
struct NullState {
    next_raw: u64,
    live: Vec<GpuHandle>,
    created: Vec<GpuHandle>,
    destroyed: Vec<GpuHandle>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, SemaphoreState>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    recordings: HashMap<vk::CommandBuffer, Vec<Command>>,
    buffers: HashMap<vk::Buffer, SimBuffer>,
    swapchains: HashMap<vk::SwapchainKHR, SimSwapchain>,
    swapchains_created: usize,
    surface_extent: Option<vk::Extent2D>,
    suboptimal: bool,
    invalidate_after_acquire: bool,
    failing_destroys: Option<&'static str>,
    descriptor_writes: Vec<(vk::DescriptorSet, u32, vk::ImageView, vk::Sampler)>,
    last_pipeline: Option<GraphicsPipelineDesc>,
    presents: Vec<PresentRecord>,
    submissions: usize,
    one_shot_submissions: usize,
    violations: Vec<String>,
}

impl NullState {
    fn next<H: Handle>(&mut self) -> H {
        self.next_raw += 1;
        H::from_raw(self.next_raw)
    }

    fn create(&mut self, handle: GpuHandle) {
        self.live.push(handle);
        self.created.push(handle);
    }

    fn violation(&mut self, message: String) {
        log::error!("[null gpu] {}", message);
        self.violations.push(message);
    }

    fn complete_fence(&mut self, fence: vk::Fence) {
        self.fences.insert(fence, FenceState::Signaled);
        for state in self.command_buffers.values_mut() {
            if state.in_flight == Some(fence) {
                state.in_flight = None;
            }
        }
    }

    fn check_not_in_flight(&mut self, command_buffer: vk::CommandBuffer, action: &str) -> EngineResult<()> {
        let in_flight = match self.command_buffers.get(&command_buffer) {
            Some(state) => state.in_flight,
            None => {
                return Err(EngineError::UnknownHandle(format!("command buffer {:?}", command_buffer)));
            }
        };
        if in_flight.is_some() {
            self.violation(format!(
                "command buffer {:?} {} while its submission is still in flight",
                command_buffer, action
            ));
        }
        Ok(())
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) -> EngineResult<()> {
        match self.semaphores.get(&semaphore).copied() {
            Some(SemaphoreState::Signaled) => Ok(()),
            Some(state) => {
                self.violation(format!("{} waits on semaphore {:?} in state {:?}", by, semaphore, state));
                Ok(())
            }
            None => Err(EngineError::UnknownHandle(format!("semaphore {:?}", semaphore))),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, by: &str) -> EngineResult<()> {
        match self.semaphores.get(&semaphore).copied() {
            Some(SemaphoreState::Unsignaled) => {}
            Some(state) => {
                self.violation(format!("{} signals semaphore {:?} still in state {:?}", by, semaphore, state));
            }
            None => return Err(EngineError::UnknownHandle(format!("semaphore {:?}", semaphore))),
        }
        self.semaphores.insert(semaphore, SemaphoreState::Signaled);
        Ok(())
    }
}

/// A device with no hardware behind it.
///
/// Clones share the same simulated device, so a test can hand one clone to
/// the engine and keep another to steer and inspect it.
#[derive(Clone)]
pub struct NullGpu {
    name: String,
    config: NullGpuConfig,
    state: Arc<Mutex<NullState>>,
}

impl NullGpu {
    pub fn new() -> Self {
        Self::with_config(NullGpuConfig::default())
    }

    /// Build the device without adapter checks.
    pub fn with_config(config: NullGpuConfig) -> Self {
        let name = config
            .adapters
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "Null Device".to_string());
        let state = NullState {
            surface_extent: config.surface_extent,
            ..NullState::default()
        };
        Self {
            name,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Run the same adapter selection as the Vulkan backend over the
    /// configured adapters.
    pub fn bootstrap(config: NullGpuConfig) -> EngineResult<Self> {
        let choice = adapter::select_adapter(&config.adapters)?;
        let mut gpu = Self::with_config(config);
        gpu.name = gpu.config.adapters[choice.index].name.clone();
        Ok(gpu)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Test controls
    // ─────────────────────────────────────────────────────────────────────────

    /// The window was resized: the surface reports the new extent (when it
    /// defines one) and every swapchain becomes out of date.
    pub fn resize_surface(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        if state.surface_extent.is_some() {
            state.surface_extent = Some(vk::Extent2D { width, height });
        }
        for swapchain in state.swapchains.values_mut() {
            swapchain.out_of_date = true;
        }
    }

    /// Make every existing swapchain report out-of-date.
    pub fn invalidate_swapchains(&self) {
        let mut state = self.state.lock();
        for swapchain in state.swapchains.values_mut() {
            swapchain.out_of_date = true;
        }
    }

    /// The next acquire succeeds, then the swapchain goes out of date before
    /// the image is presented.
    pub fn invalidate_after_acquire(&self) {
        self.state.lock().invalidate_after_acquire = true;
    }

    /// Destroying a live object of this kind (`GpuHandle::kind`) fails and
    /// leaves it alive, until `allow_destroys`.
    pub fn fail_destroys_of(&self, kind: &'static str) {
        self.state.lock().failing_destroys = Some(kind);
    }

    pub fn allow_destroys(&self) {
        self.state.lock().failing_destroys = None;
    }

    /// The next acquire and present report suboptimal.
    pub fn mark_suboptimal(&self) {
        self.state.lock().suboptimal = true;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Objects alive right now, in creation order.
    pub fn live_handles(&self) -> Vec<GpuHandle> {
        self.state.lock().live.clone()
    }

    pub fn created_handles(&self) -> Vec<GpuHandle> {
        self.state.lock().created.clone()
    }

    /// Objects destroyed so far, in destruction order.
    pub fn destroyed_handles(&self) -> Vec<GpuHandle> {
        self.state.lock().destroyed.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.lock().presents.clone()
    }

    /// Frame submissions (one-shot uploads not included).
    pub fn submissions(&self) -> usize {
        self.state.lock().submissions
    }

    pub fn one_shot_submissions(&self) -> usize {
        self.state.lock().one_shot_submissions
    }

    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).map(|b| b.contents.clone())
    }

    pub fn buffer_intent(&self, buffer: vk::Buffer) -> Option<MemoryIntent> {
        self.state.lock().buffers.get(&buffer).map(|b| b.intent)
    }

    pub fn descriptor_writes(&self) -> Vec<(vk::DescriptorSet, u32, vk::ImageView, vk::Sampler)> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn last_pipeline_desc(&self) -> Option<GraphicsPipelineDesc> {
        self.state.lock().last_pipeline.clone()
    }

    /// Commands most recently recorded into `command_buffer`.
    pub fn last_recording(&self, command_buffer: vk::CommandBuffer) -> Option<Vec<Command>> {
        self.state.lock().recordings.get(&command_buffer).cloned()
    }
}

impl Default for NullGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpu for NullGpu {
    fn adapter_name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_sampler_anisotropy: self.config.max_sampler_anisotropy,
        }
    }

    fn wait_idle(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        let pending: Vec<vk::Fence> = state
            .fences
            .iter()
            .filter(|(_, s)| **s == FenceState::Pending)
            .map(|(f, _)| *f)
            .collect();
        for fence in pending {
            state.complete_fence(fence);
        }
        Ok(())
    }

    fn surface_support(&self) -> EngineResult<SurfaceSupport> {
        let state = self.state.lock();
        let undefined = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        Ok(SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: self.config.min_image_count,
                max_image_count: self.config.max_image_count,
                current_extent: state.surface_extent.unwrap_or(undefined),
                min_image_extent: self.config.min_image_extent,
                max_image_extent: self.config.max_image_extent,
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: self.config.formats.clone(),
            present_modes: self.config.present_modes.clone(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> EngineResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let mut state = self.state.lock();
        if !state.swapchains.is_empty() {
            state.violation("surface already has a live swapchain".to_string());
        }

        let handle: vk::SwapchainKHR = state.next();
        let images: Vec<vk::Image> = (0..desc.image_count).map(|_| state.next()).collect();
        state.create(GpuHandle::Swapchain(handle));
        state.swapchains.insert(
            handle,
            SimSwapchain {
                held: vec![false; images.len()],
                images: images.clone(),
                extent: desc.extent,
                next: 0,
                out_of_date: false,
            },
        );
        state.swapchains_created += 1;
        Ok((handle, images))
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> EngineResult<AcquireOutcome> {
        let mut state = self.state.lock();

        let (index, suboptimal) = {
            let suboptimal = state.suboptimal;
            let invalidate = state.invalidate_after_acquire;
            let chain = state
                .swapchains
                .get_mut(&swapchain)
                .ok_or_else(|| EngineError::UnknownHandle(format!("swapchain {:?}", swapchain)))?;
            if chain.out_of_date {
                return Ok(AcquireOutcome::OutOfDate);
            }

            let count = chain.images.len();
            let index = (0..count).map(|i| (chain.next + i) % count).find(|&i| !chain.held[i]);
            let index = match index {
                Some(index) => index,
                None => {
                    state.violation("acquire with every swapchain image already held".to_string());
                    return Err(EngineError::Vulkan(vk::Result::TIMEOUT));
                }
            };
            chain.held[index] = true;
            chain.next = (index + 1) % count;
            if invalidate {
                chain.out_of_date = true;
            }
            (index as u32, suboptimal)
        };
        state.invalidate_after_acquire = false;

        // The presentation that last used this image is finished with its semaphore
        for semaphore_state in state.semaphores.values_mut() {
            if *semaphore_state == SemaphoreState::HeldByPresent(swapchain, index) {
                *semaphore_state = SemaphoreState::Unsignaled;
            }
        }
        state.signal_semaphore(signal, "acquire")?;

        Ok(AcquireOutcome::Acquired {
            index: ImageIndex::new(index),
            suboptimal,
        })
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image: ImageIndex, wait: vk::Semaphore) -> EngineResult<PresentOutcome> {
        let mut state = self.state.lock();
        state.wait_semaphore(wait, "present")?;
        state
            .semaphores
            .insert(wait, SemaphoreState::HeldByPresent(swapchain, image.get()));

        let suboptimal = std::mem::take(&mut state.suboptimal);
        let (held, out_of_date, extent) = {
            let chain = state
                .swapchains
                .get_mut(&swapchain)
                .ok_or_else(|| EngineError::UnknownHandle(format!("swapchain {:?}", swapchain)))?;
            let slot = chain
                .held
                .get_mut(image.get() as usize)
                .ok_or_else(|| EngineError::UnknownHandle(format!("swapchain image {:?}", image)))?;
            let held = std::mem::replace(slot, false);
            (held, chain.out_of_date, chain.extent)
        };

        if !held {
            state.violation(format!("present of image {} that was not acquired", image.get()));
        }
        if out_of_date {
            return Ok(PresentOutcome::OutOfDate);
        }

        state.presents.push(PresentRecord {
            swapchain,
            image,
            extent,
        });
        Ok(if suboptimal {
            PresentOutcome::Suboptimal
        } else {
            PresentOutcome::Presented
        })
    }

    fn create_semaphore(&self) -> EngineResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore: vk::Semaphore = state.next();
        state.create(GpuHandle::Semaphore(semaphore));
        state.semaphores.insert(semaphore, SemaphoreState::Unsignaled);
        Ok(semaphore)
    }

    fn create_fence(&self, signaled: bool) -> EngineResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence: vk::Fence = state.next();
        state.create(GpuHandle::Fence(fence));
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> EngineResult<()> {
        let mut state = self.state.lock();
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                state.complete_fence(fence);
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                // Nothing will ever signal it: a real device would hang here
                state.violation(format!("wait on fence {:?} with no pending work", fence));
                Err(EngineError::Vulkan(vk::Result::TIMEOUT))
            }
            None => Err(EngineError::UnknownHandle(format!("fence {:?}", fence))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> EngineResult<()> {
        let mut state = self.state.lock();
        match state.fences.get(&fence).copied() {
            Some(FenceState::Pending) => state.violation(format!("reset of fence {:?} while pending", fence)),
            Some(_) => {}
            None => return Err(EngineError::UnknownHandle(format!("fence {:?}", fence))),
        }
        state.fences.insert(fence, FenceState::Unsignaled);
        Ok(())
    }

    fn create_command_pool(&self) -> EngineResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool: vk::CommandPool = state.next();
        state.create(GpuHandle::CommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> EngineResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if !state.live.contains(&GpuHandle::CommandPool(pool)) {
            return Err(EngineError::UnknownHandle(format!("command pool {:?}", pool)));
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let command_buffer: vk::CommandBuffer = state.next();
            state.command_buffers.insert(
                command_buffer,
                CommandBufferState {
                    pool,
                    recorded: false,
                    in_flight: None,
                },
            );
            buffers.push(command_buffer);
        }
        Ok(buffers)
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let mut state = self.state.lock();
        if state.check_not_in_flight(command_buffer, "freed").is_ok() {
            state.command_buffers.remove(&command_buffer);
            state.recordings.remove(&command_buffer);
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_not_in_flight(command_buffer, "reset")?;
        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.recorded = false;
        }
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, _one_time: bool, commands: &[Command]) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_not_in_flight(command_buffer, "re-recorded")?;
        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.recorded = true;
        }
        state.recordings.insert(command_buffer, commands.to_vec());
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> EngineResult<()> {
        let mut state = self.state.lock();
        let command_buffer = submission.command_buffer;

        state.check_not_in_flight(command_buffer, "submitted")?;
        if !state.command_buffers.get(&command_buffer).is_some_and(|cb| cb.recorded) {
            state.violation(format!("submit of unrecorded command buffer {:?}", command_buffer));
        }

        state.wait_semaphore(submission.wait_semaphore, "submit")?;
        state
            .semaphores
            .insert(submission.wait_semaphore, SemaphoreState::Unsignaled);
        state.signal_semaphore(submission.signal_semaphore, "submit")?;

        match state.fences.get(&submission.fence).copied() {
            Some(FenceState::Unsignaled) => {}
            Some(other) => state.violation(format!("submit with fence {:?} in state {:?}", submission.fence, other)),
            None => return Err(EngineError::UnknownHandle(format!("fence {:?}", submission.fence))),
        }
        state.fences.insert(submission.fence, FenceState::Pending);

        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.in_flight = Some(submission.fence);
        }
        state.submissions += 1;
        Ok(())
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_not_in_flight(command_buffer, "submitted")?;
        if !state.command_buffers.get(&command_buffer).is_some_and(|cb| cb.recorded) {
            state.violation(format!("submit of unrecorded command buffer {:?}", command_buffer));
        }
        state.one_shot_submissions += 1;
        Ok(())
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        intent: MemoryIntent,
        _name: &str,
    ) -> EngineResult<vk::Buffer> {
        let mut state = self.state.lock();
        let buffer: vk::Buffer = state.next();
        state.create(GpuHandle::Buffer(buffer));
        state.buffers.insert(
            buffer,
            SimBuffer {
                size,
                intent,
                contents: vec![0; size as usize],
            },
        );
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, bytes: &[u8]) -> EngineResult<()> {
        let mut state = self.state.lock();
        let sim = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| EngineError::UnknownHandle(format!("buffer {:?}", buffer)))?;

        if sim.intent != MemoryIntent::Upload {
            return Err(EngineError::InvalidUpload("buffer is not host visible".to_string()));
        }
        if bytes.len() as vk::DeviceSize > sim.size {
            return Err(EngineError::InvalidUpload(format!(
                "{} bytes do not fit in a {} byte buffer",
                bytes.len(),
                sim.size
            )));
        }
        sim.contents[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn create_image(&self, _desc: &ImageDesc, _name: &str) -> EngineResult<vk::Image> {
        let mut state = self.state.lock();
        let image: vk::Image = state.next();
        state.create(GpuHandle::Image(image));
        Ok(image)
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format, _aspect: vk::ImageAspectFlags) -> EngineResult<vk::ImageView> {
        let mut state = self.state.lock();
        let view: vk::ImageView = state.next();
        state.create(GpuHandle::ImageView(view));
        Ok(view)
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> EngineResult<vk::Sampler> {
        let mut state = self.state.lock();
        let sampler: vk::Sampler = state.next();
        state.create(GpuHandle::Sampler(sampler));
        Ok(sampler)
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBinding]) -> EngineResult<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        let layout: vk::DescriptorSetLayout = state.next();
        state.create(GpuHandle::DescriptorSetLayout(layout));
        Ok(layout)
    }

    fn create_descriptor_pool(&self, _sizes: &[vk::DescriptorPoolSize], _max_sets: u32) -> EngineResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let pool: vk::DescriptorPool = state.next();
        state.create(GpuHandle::DescriptorPool(pool));
        Ok(pool)
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, _layout: vk::DescriptorSetLayout) -> EngineResult<vk::DescriptorSet> {
        let mut state = self.state.lock();
        if !state.live.contains(&GpuHandle::DescriptorPool(pool)) {
            return Err(EngineError::UnknownHandle(format!("descriptor pool {:?}", pool)));
        }
        Ok(state.next())
    }

    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler) {
        self.state.lock().descriptor_writes.push((set, binding, view, sampler));
    }

    fn create_shader_module(&self, _words: &[u32]) -> EngineResult<vk::ShaderModule> {
        let mut state = self.state.lock();
        let module: vk::ShaderModule = state.next();
        state.create(GpuHandle::ShaderModule(module));
        Ok(module)
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout], _push_constant_size: u32) -> EngineResult<vk::PipelineLayout> {
        let mut state = self.state.lock();
        let layout: vk::PipelineLayout = state.next();
        state.create(GpuHandle::PipelineLayout(layout));
        Ok(layout)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> EngineResult<vk::Pipeline> {
        let mut state = self.state.lock();
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.live.contains(&GpuHandle::ShaderModule(module)) {
                return Err(EngineError::UnknownHandle(format!("shader module {:?}", module)));
            }
        }
        let pipeline: vk::Pipeline = state.next();
        state.create(GpuHandle::Pipeline(pipeline));
        state.last_pipeline = Some(desc.clone());
        Ok(pipeline)
    }

    fn destroy(&self, handle: GpuHandle) -> EngineResult<()> {
        let mut state = self.state.lock();

        let Some(position) = state.live.iter().position(|h| *h == handle) else {
            let message = if state.destroyed.contains(&handle) {
                format!("{} {:?} destroyed twice", handle.kind(), handle)
            } else {
                format!("destroy of unknown {} {:?}", handle.kind(), handle)
            };
            state.violation(message.clone());
            return Err(EngineError::UnknownHandle(message));
        };
        if state.failing_destroys == Some(handle.kind()) {
            return Err(EngineError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        state.live.remove(position);
        state.destroyed.push(handle);

        match handle {
            GpuHandle::Fence(fence) => {
                if state.fences.remove(&fence) == Some(FenceState::Pending) {
                    state.violation(format!("fence {:?} destroyed while pending", fence));
                }
            }
            GpuHandle::Semaphore(semaphore) => {
                state.semaphores.remove(&semaphore);
            }
            GpuHandle::CommandPool(pool) => {
                let owned: Vec<vk::CommandBuffer> = state
                    .command_buffers
                    .iter()
                    .filter(|(_, cb)| cb.pool == pool)
                    .map(|(handle, _)| *handle)
                    .collect();
                for command_buffer in owned {
                    if let Some(cb) = state.command_buffers.remove(&command_buffer) {
                        if cb.in_flight.is_some() {
                            state.violation(format!("command pool {:?} destroyed with work in flight", pool));
                        }
                    }
                    state.recordings.remove(&command_buffer);
                }
            }
            GpuHandle::Buffer(buffer) => {
                state.buffers.remove(&buffer);
            }
            GpuHandle::Swapchain(swapchain) => {
                state.swapchains.remove(&swapchain);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(command_buffer: vk::CommandBuffer, wait: vk::Semaphore, signal: vk::Semaphore, fence: vk::Fence) -> Submission {
        Submission {
            command_buffer,
            wait_semaphore: wait,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: signal,
            fence,
        }
    }

    #[test]
    fn double_destroy_is_reported() {
        let gpu = NullGpu::new();
        let fence = gpu.create_fence(true).unwrap();

        gpu.destroy(GpuHandle::Fence(fence)).unwrap();
        let second = gpu.destroy(GpuHandle::Fence(fence));

        assert!(matches!(second, Err(EngineError::UnknownHandle(_))));
        assert_eq!(gpu.violations().len(), 1);
        assert!(gpu.violations()[0].contains("destroyed twice"));
    }

    #[test]
    fn rerecording_in_flight_command_buffer_is_reported() {
        let gpu = NullGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let wait = gpu.create_semaphore().unwrap();
        let signal = gpu.create_semaphore().unwrap();
        let fence = gpu.create_fence(false).unwrap();
        let swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface_format: NullGpuConfig::default().formats[0],
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D { width: 4, height: 4 },
                image_count: 2,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            })
            .unwrap()
            .0;

        gpu.acquire_next_image(swapchain, wait).unwrap();
        gpu.record(cmd, false, &[]).unwrap();
        gpu.submit(&submission(cmd, wait, signal, fence)).unwrap();
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());

        gpu.record(cmd, false, &[]).unwrap();
        assert_eq!(gpu.violations().len(), 1);

        // Once the fence is observed the buffer is free again
        gpu.wait_for_fence(fence).unwrap();
        gpu.reset_command_buffer(cmd).unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn waiting_on_a_fence_nobody_will_signal_fails() {
        let gpu = NullGpu::new();
        let fence = gpu.create_fence(false).unwrap();

        assert!(gpu.wait_for_fence(fence).is_err());
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn acquire_cycles_through_images_and_goes_out_of_date_on_resize() {
        let gpu = NullGpu::new();
        let (swapchain, images) = gpu
            .create_swapchain(&SwapchainDesc {
                surface_format: NullGpuConfig::default().formats[0],
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D { width: 8, height: 8 },
                image_count: 3,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            })
            .unwrap();
        assert_eq!(images.len(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let semaphore = gpu.create_semaphore().unwrap();
            match gpu.acquire_next_image(swapchain, semaphore).unwrap() {
                AcquireOutcome::Acquired { index, .. } => seen.push(index.get()),
                AcquireOutcome::OutOfDate => panic!("unexpected out of date"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);

        gpu.resize_surface(16, 16);
        let semaphore = gpu.create_semaphore().unwrap();
        assert_eq!(
            gpu.acquire_next_image(swapchain, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn bootstrap_applies_adapter_selection() {
        let config = NullGpuConfig {
            adapters: Vec::new(),
            ..NullGpuConfig::default()
        };
        assert!(matches!(NullGpu::bootstrap(config), Err(EngineError::NoAdapter)));

        let gpu = NullGpu::bootstrap(NullGpuConfig::default()).unwrap();
        assert_eq!(gpu.adapter_name(), "Null Device");
    }
}
