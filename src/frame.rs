// Frame scheduling - in-flight frame slots
//
// Two kinds of per-frame state exist and they are indexed differently:
//   - PerSlot<T>:  one entry per frame in flight (F), indexed by SlotIndex
//   - PerImage<T>: one entry per swapchain image (N), indexed by ImageIndex
// Mixing them up is a compile error.
//
// Per-frame timeline driven by Engine::draw_frame:
//   wait(fence) -> acquire -> reset(fence, cmd) -> record -> submit -> present -> advance

use ash::vk;
use std::ops::Index;

use crate::error::EngineResult;
use crate::gpu::{AcquireOutcome, Gpu, PresentOutcome, Submission};
use crate::teardown::TeardownList;

/// Position in the ring of in-flight frames (0..F).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// Index of a swapchain image, as returned by acquire (0..N).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(u32);

impl ImageIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// One entry per frame in flight.
#[derive(Debug)]
pub struct PerSlot<T>(Vec<T>);

impl<T> PerSlot<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T> Index<SlotIndex> for PerSlot<T> {
    type Output = T;

    fn index(&self, index: SlotIndex) -> &T {
        &self.0[index.0]
    }
}

/// One entry per swapchain image.
#[derive(Debug)]
pub struct PerImage<T>(Vec<T>);

impl<T> PerImage<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn get(&self, index: ImageIndex) -> Option<&T> {
        self.0.get(index.0 as usize)
    }
}

impl<T> Index<ImageIndex> for PerImage<T> {
    type Output = T;

    fn index(&self, index: ImageIndex) -> &T {
        &self.0[index.0 as usize]
    }
}

/// Sync objects and command buffer owned by one in-flight frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signaled when the GPU finishes this slot's last submission
    pub in_flight: vk::Fence,
}

/// Ring of `F` frame slots.
pub struct FrameScheduler {
    slots: PerSlot<FrameSlot>,
    current: SlotIndex,
}

impl FrameScheduler {
    /// Create `frames_in_flight` slots. Fences start signaled so the first
    /// wait on each slot returns immediately.
    pub fn new<G: Gpu>(
        gpu: &G,
        command_pool: vk::CommandPool,
        frames_in_flight: usize,
        owned: &mut TeardownList,
    ) -> EngineResult<Self> {
        let command_buffers = gpu.allocate_command_buffers(command_pool, frames_in_flight as u32)?;

        let mut slots = Vec::with_capacity(frames_in_flight);
        for command_buffer in command_buffers {
            let image_available = owned.track(gpu.create_semaphore()?);
            let in_flight = owned.track(gpu.create_fence(true)?);
            slots.push(FrameSlot {
                command_buffer,
                image_available,
                in_flight,
            });
        }

        log::info!("Frame scheduler created with {} frames in flight", slots.len());

        Ok(Self {
            slots: PerSlot::new(slots),
            current: SlotIndex(0),
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> SlotIndex {
        self.current
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn slots(&self) -> &PerSlot<FrameSlot> {
        &self.slots
    }

    /// Step 1: block until the GPU is done with this slot's previous submission.
    pub fn wait<G: Gpu>(&self, gpu: &G) -> EngineResult<()> {
        gpu.wait_for_fence(self.current().in_flight)
    }

    /// Step 2: acquire the next image, signaling this slot's image-available semaphore.
    pub fn acquire<G: Gpu>(&self, gpu: &G, swapchain: vk::SwapchainKHR) -> EngineResult<AcquireOutcome> {
        gpu.acquire_next_image(swapchain, self.current().image_available)
    }

    /// Step 3: only after a successful acquire, so an abandoned frame leaves
    /// the fence signaled and the slot reusable.
    pub fn reset<G: Gpu>(&self, gpu: &G) -> EngineResult<()> {
        let slot = self.current();
        gpu.reset_fence(slot.in_flight)?;
        gpu.reset_command_buffer(slot.command_buffer)
    }

    /// Step 5: submit the recorded command buffer.
    ///
    /// `render_finished` is indexed by the acquired image, not by slot: image K
    /// may be re-acquired by a different slot while its previous presentation
    /// still waits on K's semaphore.
    pub fn submit<G: Gpu>(
        &self,
        gpu: &G,
        image: ImageIndex,
        render_finished: &PerImage<vk::Semaphore>,
    ) -> EngineResult<()> {
        let slot = self.current();
        gpu.submit(&Submission {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: render_finished[image],
            fence: slot.in_flight,
        })
    }

    /// Step 6: present, waiting on the same per-image semaphore.
    pub fn present<G: Gpu>(
        &self,
        gpu: &G,
        swapchain: vk::SwapchainKHR,
        image: ImageIndex,
        render_finished: &PerImage<vk::Semaphore>,
    ) -> EngineResult<PresentOutcome> {
        gpu.present(swapchain, image, render_finished[image])
    }

    /// Step 7
    pub fn advance(&mut self) {
        self.current = SlotIndex((self.current.0 + 1) % self.slots.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_image_and_per_slot_have_independent_lengths() {
        let slots = PerSlot::new(vec!["a", "b"]);
        let images = PerImage::new(vec![10, 11, 12]);

        assert_eq!(slots.len(), 2);
        assert_eq!(images.len(), 3);
        assert_eq!(slots[SlotIndex(1)], "b");
        assert_eq!(images[ImageIndex::new(2)], 12);
        assert!(images.get(ImageIndex::new(3)).is_none());
    }

    #[test]
    fn advance_wraps_modulo_frames_in_flight() {
        let mut scheduler = FrameScheduler {
            slots: PerSlot::new(vec![
                FrameSlot {
                    command_buffer: vk::CommandBuffer::null(),
                    image_available: vk::Semaphore::null(),
                    in_flight: vk::Fence::null(),
                };
                2
            ]),
            current: SlotIndex(0),
        };

        let visited: Vec<usize> = (0..5)
            .map(|_| {
                let index = scheduler.current_index().get();
                scheduler.advance();
                index
            })
            .collect();

        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }
}
