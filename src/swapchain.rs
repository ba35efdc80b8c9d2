// Swapchain - presentable images and everything sized by them
//
// A Swapchain value owns, in acquisition order:
//   swapchain -> image views -> depth image -> depth view -> render-finished semaphores
// and is replaced wholesale on recreation (old one fully destroyed first).

use ash::vk;
use serde::Deserialize;

use crate::allocator::ResourceAllocator;
use crate::error::{EngineError, EngineResult};
use crate::frame::{ImageIndex, PerImage};
use crate::gpu::{Gpu, GpuHandle, ImageDesc, MemoryIntent, SwapchainDesc};
use crate::pipeline::DEPTH_FORMAT;
use crate::recorder::FrameTarget;
use crate::teardown::TeardownList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModePreference {
    /// Low latency without tearing, falls back to FIFO
    #[default]
    Mailbox,
    /// Always vsync
    Fifo,
}

/// Prefer B8G8R8A8_SRGB with the sRGB color space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> EngineResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| EngineError::Surface("surface reports no formats".to_string()))
}

/// FIFO is always supported, so it is the fallback.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => vk::PresentModeKHR::MAILBOX,
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's extent when it defines one, else the framebuffer size
/// clamped to the supported range.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, so the driver never blocks us; 0 means no maximum.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainSettings {
    pub depth_test: bool,
    pub present_mode: PresentModePreference,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    images: PerImage<vk::Image>,
    views: PerImage<vk::ImageView>,
    depth: Option<(vk::Image, vk::ImageView)>,
    /// Indexed by image, never by frame slot
    render_finished: PerImage<vk::Semaphore>,
    owned: TeardownList,
}

impl Swapchain {
    /// Build a swapchain from the current surface state. On failure every
    /// object created so far is destroyed again.
    pub fn create<G: Gpu>(
        gpu: &G,
        allocator: &mut ResourceAllocator,
        framebuffer: vk::Extent2D,
        settings: SwapchainSettings,
    ) -> EngineResult<Self> {
        let mut owned = TeardownList::new("swapchain");
        match Self::build(gpu, allocator, &mut owned, framebuffer, settings) {
            Ok(parts) => Ok(parts.finish(owned)),
            Err(e) => {
                if let Err(cleanup) = owned.release(gpu, allocator) {
                    log::error!("Cleanup after failed swapchain creation: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn build<G: Gpu>(
        gpu: &G,
        allocator: &mut ResourceAllocator,
        owned: &mut TeardownList,
        framebuffer: vk::Extent2D,
        settings: SwapchainSettings,
    ) -> EngineResult<SwapchainParts> {
        let support = gpu.surface_support()?;
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, settings.present_mode);
        let extent = choose_extent(&support.capabilities, framebuffer);
        let image_count = choose_image_count(&support.capabilities);

        if extent.width == 0 || extent.height == 0 {
            return Err(EngineError::Surface(format!(
                "cannot create a {}x{} swapchain",
                extent.width, extent.height
            )));
        }

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        // ─────────────────────────────────────────────────────────────────────
        // Swapchain + one view per image
        // ─────────────────────────────────────────────────────────────────────
        let (handle, images) = gpu.create_swapchain(&SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: support.capabilities.current_transform,
        })?;
        let handle = owned.track(handle);

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            views.push(owned.track(gpu.create_image_view(
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?));
        }

        // ─────────────────────────────────────────────────────────────────────
        // Depth target, same extent as the swapchain
        // ─────────────────────────────────────────────────────────────────────
        let depth = if settings.depth_test {
            let image = allocator.create_image(
                gpu,
                &ImageDesc {
                    extent,
                    format: DEPTH_FORMAT,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    intent: MemoryIntent::GpuOnly,
                },
                "depth",
            )?;
            let image = owned.adopt_image(image);
            let view = owned.track(gpu.create_image_view(image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)?);
            Some((image, view))
        } else {
            None
        };

        // ─────────────────────────────────────────────────────────────────────
        // One render-finished semaphore per image
        // ─────────────────────────────────────────────────────────────────────
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in &images {
            render_finished.push(owned.track(gpu.create_semaphore()?));
        }

        log::info!("Swapchain created with {} images", images.len());

        Ok(SwapchainParts {
            handle,
            format: surface_format.format,
            extent,
            present_mode,
            images: PerImage::new(images),
            views: PerImage::new(views),
            depth,
            render_finished: PerImage::new(render_finished),
        })
    }

    /// Wait idle, tear the old chain down, build a new one.
    pub fn recreate<G: Gpu>(
        self,
        gpu: &G,
        allocator: &mut ResourceAllocator,
        framebuffer: vk::Extent2D,
        settings: SwapchainSettings,
    ) -> EngineResult<Self> {
        gpu.wait_idle()?;
        self.destroy(gpu, allocator)?;
        Self::create(gpu, allocator, framebuffer, settings)
    }

    pub fn destroy<G: Gpu>(self, gpu: &G, allocator: &mut ResourceAllocator) -> EngineResult<()> {
        self.owned.release(gpu, allocator)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn render_finished(&self) -> &PerImage<vk::Semaphore> {
        &self.render_finished
    }

    /// Color image, view and depth target for drawing into `image`.
    pub fn target(&self, image: ImageIndex) -> FrameTarget {
        FrameTarget {
            color_image: self.images[image],
            color_view: self.views[image],
            depth: self.depth,
            extent: self.extent,
        }
    }

    /// Everything this swapchain owns, in acquisition order.
    pub fn owned_handles(&self) -> Vec<GpuHandle> {
        self.owned.handles()
    }
}

struct SwapchainParts {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    images: PerImage<vk::Image>,
    views: PerImage<vk::ImageView>,
    depth: Option<(vk::Image, vk::ImageView)>,
    render_finished: PerImage<vk::Semaphore>,
}

impl SwapchainParts {
    fn finish(self, owned: TeardownList) -> Swapchain {
        Swapchain {
            handle: self.handle,
            format: self.format,
            extent: self.extent,
            present_mode: self.present_mode,
            images: self.images,
            views: self.views,
            depth: self.depth,
            render_finished: self.render_finished,
            owned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::{NullGpu, NullGpuConfig};

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn present_mode_prefers_mailbox_and_falls_back_to_fifo() {
        use vk::PresentModeKHR as P;
        let mailbox = PresentModePreference::Mailbox;

        assert_eq!(choose_present_mode(&[P::FIFO], mailbox), P::FIFO);
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], mailbox), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::MAILBOX], mailbox), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], PresentModePreference::Fifo), P::FIFO);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap(), srgb);
        assert_eq!(choose_surface_format(&[unorm]).unwrap(), unorm);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn defined_current_extent_wins() {
        let caps = caps((1024, 768), (1, 1), (4096, 4096));
        assert_eq!(choose_extent(&caps, extent(10, 10)), extent(1024, 768));
    }

    #[test]
    fn undefined_extent_is_clamped_per_axis() {
        let caps = caps((u32::MAX, u32::MAX), (100, 200), (1920, 1080));

        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
        assert_eq!(choose_extent(&caps, extent(50, 5000)), extent(100, 1080));
        assert_eq!(choose_extent(&caps, extent(9999, 0)), extent(1920, 200));
    }

    #[test]
    fn clamped_extent_stays_in_range_for_any_framebuffer() {
        let caps = caps((u32::MAX, u32::MAX), (64, 48), (2560, 1440));
        for width in [0, 1, 63, 64, 65, 1000, 2559, 2560, 2561, u32::MAX - 1] {
            for height in [0, 47, 48, 720, 1440, 1441] {
                let chosen = choose_extent(&caps, extent(width, height));
                assert!((64..=2560).contains(&chosen.width));
                assert!((48..=1440).contains(&chosen.height));
            }
        }
    }

    #[test]
    fn image_count_is_min_plus_one_clamped_to_max() {
        let mut caps = caps((1, 1), (1, 1), (1, 1));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn one_render_finished_semaphore_per_image() {
        let gpu = NullGpu::with_config(NullGpuConfig {
            min_image_count: 3,
            ..NullGpuConfig::default()
        });
        let mut allocator = ResourceAllocator::new();
        let settings = SwapchainSettings {
            depth_test: true,
            present_mode: PresentModePreference::Mailbox,
        };

        let swapchain = Swapchain::create(&gpu, &mut allocator, extent(800, 600), settings).unwrap();

        assert_eq!(swapchain.image_count(), 4);
        assert_eq!(swapchain.render_finished().len(), swapchain.image_count());
        assert!(swapchain.target(ImageIndex::new(0)).depth.is_some());

        swapchain.destroy(&gpu, &mut allocator).unwrap();
        assert!(gpu.live_handles().is_empty());
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn teardown_order_is_reverse_of_creation() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let settings = SwapchainSettings {
            depth_test: true,
            present_mode: PresentModePreference::Mailbox,
        };

        let swapchain = Swapchain::create(&gpu, &mut allocator, extent(640, 480), settings).unwrap();
        let mut expected = swapchain.owned_handles();
        expected.reverse();

        swapchain.destroy(&gpu, &mut allocator).unwrap();

        assert_eq!(gpu.destroyed_handles(), expected);
        assert!(matches!(expected.first(), Some(GpuHandle::Semaphore(_))));
        assert!(matches!(expected.last(), Some(GpuHandle::Swapchain(_))));
    }
}
