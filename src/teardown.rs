// Teardown list - ownership of long-lived GPU objects
//
// Every object the engine keeps beyond a single call is registered here the
// moment it is created. The list is its only owner; components keep copies of
// the raw handles for recording. Release walks the list backwards, so objects
// are destroyed in reverse acquisition order:
//
//   created:   pool -> sampler -> layout -> pipeline -> fences
//   destroyed: fences -> pipeline -> layout -> sampler -> pool

use ash::vk;

use crate::allocator::{AllocatedBuffer, AllocatedImage, ResourceAllocator};
use crate::error::EngineResult;
use crate::gpu::{Gpu, GpuHandle};

/// Handle types the list can own directly.
///
/// Buffers and images are deliberately missing: they come from the
/// [`ResourceAllocator`] and enter the list by value via
/// [`TeardownList::adopt_buffer`] / [`TeardownList::adopt_image`].
pub trait OwnedObject: Copy {
    fn into_handle(self) -> GpuHandle;
}

macro_rules! owned_object {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl OwnedObject for $ty {
                fn into_handle(self) -> GpuHandle {
                    GpuHandle::$variant(self)
                }
            }
        )*
    };
}

owned_object! {
    vk::ImageView => ImageView,
    vk::Sampler => Sampler,
    vk::Semaphore => Semaphore,
    vk::Fence => Fence,
    vk::CommandPool => CommandPool,
    vk::DescriptorPool => DescriptorPool,
    vk::DescriptorSetLayout => DescriptorSetLayout,
    vk::PipelineLayout => PipelineLayout,
    vk::Pipeline => Pipeline,
    vk::ShaderModule => ShaderModule,
    vk::SwapchainKHR => Swapchain,
}

enum Owned {
    Object(GpuHandle),
    Buffer(AllocatedBuffer),
    Image(AllocatedImage),
}

impl Owned {
    fn handle(&self) -> GpuHandle {
        match self {
            Owned::Object(handle) => *handle,
            Owned::Buffer(buffer) => GpuHandle::Buffer(buffer.handle()),
            Owned::Image(image) => GpuHandle::Image(image.handle()),
        }
    }
}

/// Ordered owner of GPU objects.
pub struct TeardownList {
    label: &'static str,
    entries: Vec<Owned>,
}

impl TeardownList {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
        }
    }

    /// Take ownership of a freshly created object and hand back its handle.
    pub fn track<H: OwnedObject>(&mut self, object: H) -> H {
        self.push(Owned::Object(object.into_handle()));
        object
    }

    pub fn adopt_buffer(&mut self, buffer: AllocatedBuffer) -> vk::Buffer {
        let handle = buffer.handle();
        self.push(Owned::Buffer(buffer));
        handle
    }

    pub fn adopt_image(&mut self, image: AllocatedImage) -> vk::Image {
        let handle = image.handle();
        self.push(Owned::Image(image));
        handle
    }

    fn push(&mut self, owned: Owned) {
        let handle = owned.handle();
        debug_assert!(
            !self.entries.iter().any(|entry| entry.handle() == handle),
            "{} registered twice in {} teardown list",
            handle.kind(),
            self.label
        );
        self.entries.push(owned);
    }

    /// Handles in acquisition order.
    pub fn handles(&self) -> Vec<GpuHandle> {
        self.entries.iter().map(Owned::handle).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy everything in reverse acquisition order.
    ///
    /// Keeps going after a failed destroy so one bad handle cannot leak the
    /// rest; the first error is returned.
    pub fn release<G: Gpu>(self, gpu: &G, allocator: &mut ResourceAllocator) -> EngineResult<()> {
        let count = self.entries.len();
        let mut first_error = None;

        for owned in self.entries.into_iter().rev() {
            let result = match owned {
                Owned::Object(handle) => gpu.destroy(handle),
                Owned::Buffer(buffer) => allocator.free_buffer(gpu, buffer),
                Owned::Image(image) => allocator.free_image(gpu, image),
            };
            if let Err(e) = result {
                log::error!("Teardown ({}): {}", self.label, e);
                first_error.get_or_insert(e);
            }
        }

        log::info!("Released {} {} objects", count, self.label);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullGpu;

    #[test]
    fn release_runs_in_reverse_acquisition_order() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let mut list = TeardownList::new("test");

        let pool = list.track(gpu.create_command_pool().unwrap());
        let semaphore = list.track(gpu.create_semaphore().unwrap());
        let fence = list.track(gpu.create_fence(true).unwrap());

        assert_eq!(
            list.handles(),
            vec![
                GpuHandle::CommandPool(pool),
                GpuHandle::Semaphore(semaphore),
                GpuHandle::Fence(fence),
            ]
        );

        list.release(&gpu, &mut allocator).unwrap();

        assert_eq!(
            gpu.destroyed_handles(),
            vec![
                GpuHandle::Fence(fence),
                GpuHandle::Semaphore(semaphore),
                GpuHandle::CommandPool(pool),
            ]
        );
        assert!(gpu.live_handles().is_empty());
    }

    #[test]
    fn adopted_allocations_are_freed_through_the_allocator() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let mut list = TeardownList::new("test");

        let buffer = allocator
            .upload_buffer(&gpu, &[1, 2, 3, 4], vk::BufferUsageFlags::VERTEX_BUFFER, "bytes")
            .unwrap();
        list.adopt_buffer(buffer);
        assert_eq!(allocator.live_allocations(), 1);

        list.release(&gpu, &mut allocator).unwrap();

        assert_eq!(allocator.live_allocations(), 0);
        assert!(gpu.live_handles().is_empty());
    }
}
