// Synchronization primitives and queue submission
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync.

use ash::vk;

use super::VulkanDevice;
use crate::error::EngineResult;
use crate::gpu::Submission;

impl VulkanDevice {
    pub(super) fn new_semaphore(&self) -> EngineResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&semaphore_info, None) }?)
    }

    pub(super) fn new_fence(&self, signaled: bool) -> EngineResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&fence_info, None) }?)
    }

    pub(super) fn wait_fence(&self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }?;
        Ok(())
    }

    pub(super) fn reset_fence_now(&self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }?;
        Ok(())
    }

    /// Graphics queue submission: wait one semaphore, signal one, fence on completion.
    pub(super) fn queue_submit(&self, submission: &Submission) -> EngineResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], submission.fence)
        }?;
        Ok(())
    }

    /// One-shot submission that blocks on its own transient fence.
    pub(super) fn queue_submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> EngineResult<()> {
        let fence = self.new_fence(false)?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        let result = unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .and_then(|()| self.device.wait_for_fences(&[fence], true, u64::MAX))
        };

        unsafe { self.device.destroy_fence(fence, None) };
        result?;
        Ok(())
    }
}
