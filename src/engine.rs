// =============================================================================
// ENGINE - the renderer context
// =============================================================================
//
// One Engine value owns everything: the device, the allocator, the long-lived
// objects (through its teardown list) and the current swapchain.
//
// ACQUISITION ORDER (teardown runs it backwards):
// ┌─────────────────────────────────────────────────────────────────┐
// │  command pool                                                   │
// │    └── texture image, view, sampler                             │
// │          └── descriptor layout, pool                            │
// │                └── pipeline layout, pipeline                    │
// │                      └── frame slots (semaphores, fences)       │
// │                            └── mesh buffers                     │
// │                                  └── swapchain (own list)       │
// └─────────────────────────────────────────────────────────────────┘
//
// The swapchain comes last so that it is also the most recent acquisition
// after every recreation; destroying it first keeps teardown in strict
// reverse order.
//
// =============================================================================

use ash::vk;
use glam::Mat4;
use std::path::PathBuf;

use crate::allocator::ResourceAllocator;
use crate::descriptor::TextureBinding;
use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameScheduler, ImageIndex, SlotIndex};
use crate::gpu::{AcquireOutcome, Gpu, GpuHandle, PresentOutcome};
use crate::mesh::{Mesh, MeshData};
use crate::pipeline::{FixedPipeline, PipelineSettings};
use crate::recorder::{self, PipelineBinding};
use crate::swapchain::{self, PresentModePreference, Swapchain, SwapchainSettings};
use crate::teardown::TeardownList;
use crate::texture::{Texture, TextureData};

/// Settings the engine core consumes.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// F: frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub depth_test: bool,
    pub front_face: vk::FrontFace,
    pub present_mode: PresentModePreference,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            depth_test: true,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            present_mode: PresentModePreference::Mailbox,
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
        }
    }
}

impl EngineConfig {
    fn swapchain_settings(&self) -> SwapchainSettings {
        SwapchainSettings {
            depth_test: self.depth_test,
            present_mode: self.present_mode,
        }
    }

    fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            front_face: self.front_face,
            depth_test: self.depth_test,
        }
    }
}

/// Everything drawn every frame.
#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub meshes: Vec<MeshData>,
    pub texture: TextureData,
}

impl SceneAssets {
    /// A single quad with a 1x1 white texture.
    pub fn builtin() -> Self {
        Self {
            meshes: vec![MeshData::quad()],
            texture: TextureData::white(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero-sized framebuffer; nothing to draw into
    Minimized,
    /// Acquire reported out-of-date; the swapchain has been rebuilt
    SwapchainOutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Commands submitted and handed to the presentation engine
    Rendered {
        slot: SlotIndex,
        image: ImageIndex,
        present: PresentOutcome,
    },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub swapchain_recreations: u64,
}

struct EngineParts {
    command_pool: vk::CommandPool,
    texture: Texture,
    binding: TextureBinding,
    pipeline: FixedPipeline,
    frames: FrameScheduler,
    meshes: Vec<Mesh>,
    swapchain: Swapchain,
}

pub struct Engine<G: Gpu> {
    gpu: G,
    config: EngineConfig,
    allocator: ResourceAllocator,
    /// Long-lived objects in acquisition order
    owned: TeardownList,
    command_pool: vk::CommandPool,
    texture: Texture,
    binding: TextureBinding,
    pipeline: FixedPipeline,
    color_format: vk::Format,
    frames: FrameScheduler,
    meshes: Vec<Mesh>,
    /// `None` only between a failed recreation and the next attempt
    swapchain: Option<Swapchain>,
    framebuffer: vk::Extent2D,
    resize_pending: bool,
    stats: FrameStats,
}

impl<G: Gpu> Engine<G> {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Build every GPU object the engine needs.
    ///
    /// On failure everything created so far is destroyed before the error is
    /// returned; there is no partially initialized engine.
    pub fn init(gpu: G, config: &EngineConfig, framebuffer: (u32, u32), assets: &SceneAssets) -> EngineResult<Self> {
        log::info!("Initializing engine on {}", gpu.adapter_name());

        let framebuffer = vk::Extent2D {
            width: framebuffer.0,
            height: framebuffer.1,
        };
        let mut config = config.clone();
        config.frames_in_flight = config.frames_in_flight.max(1);

        let mut allocator = ResourceAllocator::new();
        let mut owned = TeardownList::new("engine");

        let parts = match Self::build(&gpu, &config, framebuffer, assets, &mut allocator, &mut owned) {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("Engine initialization failed: {}", e);
                if let Err(cleanup) = gpu.wait_idle().and_then(|()| owned.release(&gpu, &mut allocator)) {
                    log::error!("Cleanup after failed initialization: {}", cleanup);
                }
                return Err(e);
            }
        };

        log::info!(
            "Engine initialized: {} meshes, {} frames in flight, {} swapchain images",
            parts.meshes.len(),
            parts.frames.frames_in_flight(),
            parts.swapchain.image_count()
        );

        Ok(Self {
            gpu,
            allocator,
            owned,
            command_pool: parts.command_pool,
            texture: parts.texture,
            binding: parts.binding,
            pipeline: parts.pipeline,
            color_format: parts.swapchain.format(),
            frames: parts.frames,
            meshes: parts.meshes,
            swapchain: Some(parts.swapchain),
            framebuffer,
            resize_pending: false,
            stats: FrameStats::default(),
            config,
        })
    }

    fn build(
        gpu: &G,
        config: &EngineConfig,
        framebuffer: vk::Extent2D,
        assets: &SceneAssets,
        allocator: &mut ResourceAllocator,
        owned: &mut TeardownList,
    ) -> EngineResult<EngineParts> {
        if framebuffer.width == 0 || framebuffer.height == 0 {
            return Err(EngineError::Surface("cannot initialize with a zero-sized framebuffer".to_string()));
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Command pool (frame command buffers + one-shot uploads)
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = owned.track(gpu.create_command_pool()?);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Texture, then the descriptor set that samples it
        // ─────────────────────────────────────────────────────────────────────
        let texture = Texture::upload(gpu, allocator, owned, command_pool, &assets.texture)?;
        let binding = TextureBinding::create(gpu, owned, &texture)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pipeline, for the format the swapchain will pick
        // ─────────────────────────────────────────────────────────────────────
        let color_format = swapchain::choose_surface_format(&gpu.surface_support()?.formats)?.format;
        let pipeline = FixedPipeline::build(gpu, owned, &config.pipeline_settings(), binding.layout, color_format)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Frame slots
        // ─────────────────────────────────────────────────────────────────────
        let frames = FrameScheduler::new(gpu, command_pool, config.frames_in_flight, owned)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Meshes
        // ─────────────────────────────────────────────────────────────────────
        let meshes = assets
            .meshes
            .iter()
            .map(|data| Mesh::upload(gpu, allocator, owned, data))
            .collect::<EngineResult<Vec<_>>>()?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Swapchain (cleans up after itself on failure)
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = Swapchain::create(gpu, allocator, framebuffer, config.swapchain_settings())?;

        Ok(EngineParts {
            command_pool,
            texture,
            binding,
            pipeline,
            frames,
            meshes,
            swapchain,
        })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render one frame.
    ///
    /// FRAME TIMELINE:
    /// ┌──────────────────────────────────────────────────────────────────────┐
    /// │  wait(fence) ─> acquire ─> reset ─> record ─> submit ─> present ─>   │
    /// │  advance                                                             │
    /// │                                                                      │
    /// │  acquire out-of-date: rebuild swapchain, skip (fence stays signaled) │
    /// │  present out-of-date/suboptimal: rebuild at the next frame start     │
    /// └──────────────────────────────────────────────────────────────────────┘
    pub fn draw_frame(&mut self, view: Mat4, projection: Mat4) -> EngineResult<FrameOutcome> {
        if (self.resize_pending || self.swapchain.is_none()) && !self.recreate_swapchain()? {
            self.stats.frames_skipped += 1;
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| EngineError::Surface("no swapchain".to_string()))?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot
        // ─────────────────────────────────────────────────────────────────────
        self.frames.wait(&self.gpu)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire
        // ─────────────────────────────────────────────────────────────────────
        let (image, suboptimal) = match self.frames.acquire(&self.gpu, swapchain.handle())? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date at acquire");
                self.stats.frames_skipped += 1;
                self.resize_pending = true;
                self.recreate_swapchain()?;
                return Ok(FrameOutcome::Skipped(SkipReason::SwapchainOutOfDate));
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Reset fence and command buffer (only now that we will submit)
        // ─────────────────────────────────────────────────────────────────────
        self.frames.reset(&self.gpu)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record
        // ─────────────────────────────────────────────────────────────────────
        let draws: Vec<_> = self.meshes.iter().map(Mesh::draw_item).collect();
        let commands = recorder::record_frame(
            &swapchain.target(image),
            &PipelineBinding {
                pipeline: self.pipeline.pipeline,
                layout: self.pipeline.layout,
                descriptor_set: self.binding.set,
            },
            &draws,
            projection * view,
            self.config.clear_color,
        );
        self.gpu.record(self.frames.current().command_buffer, false, &commands)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5 + 6: Submit, present
        // ─────────────────────────────────────────────────────────────────────
        self.frames.submit(&self.gpu, image, swapchain.render_finished())?;
        let present = self
            .frames
            .present(&self.gpu, swapchain.handle(), image, swapchain.render_finished())?;

        if suboptimal || present.needs_recreate() {
            log::debug!("Swapchain needs recreation after present ({:?})", present);
            self.resize_pending = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Next slot
        // ─────────────────────────────────────────────────────────────────────
        let slot = self.frames.current_index();
        self.frames.advance();
        self.stats.frames_rendered += 1;

        Ok(FrameOutcome::Rendered { slot, image, present })
    }

    /// Remember the new framebuffer size; the swapchain is rebuilt at the
    /// start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Framebuffer resized to {}x{}", width, height);
        self.framebuffer = vk::Extent2D { width, height };
        self.resize_pending = true;
    }

    pub fn wait_idle(&self) -> EngineResult<()> {
        self.gpu.wait_idle()
    }

    /// The window may be minimized before its resize event arrives, so the
    /// extent the surface reports is checked as well as the framebuffer.
    fn is_minimized(&self) -> EngineResult<bool> {
        if self.framebuffer.width == 0 || self.framebuffer.height == 0 {
            return Ok(true);
        }
        let capabilities = self.gpu.surface_support()?.capabilities;
        let extent = swapchain::choose_extent(&capabilities, self.framebuffer);
        Ok(extent.width == 0 || extent.height == 0)
    }

    /// Rebuild the swapchain for the current size.
    ///
    /// Returns `false` without touching anything while the window is
    /// minimized; the rebuild stays pending until it has a real size.
    fn recreate_swapchain(&mut self) -> EngineResult<bool> {
        if self.is_minimized()? {
            log::debug!("Window minimized, swapchain rebuild deferred");
            self.resize_pending = true;
            return Ok(false);
        }

        let settings = self.config.swapchain_settings();
        let swapchain = match self.swapchain.take() {
            Some(old) => old.recreate(&self.gpu, &mut self.allocator, self.framebuffer, settings)?,
            None => {
                self.gpu.wait_idle()?;
                Swapchain::create(&self.gpu, &mut self.allocator, self.framebuffer, settings)?
            }
        };

        if swapchain.format() != self.color_format {
            log::warn!(
                "Surface format changed from {:?} to {:?}; pipeline keeps the old one",
                self.color_format,
                swapchain.format()
            );
        }

        log::info!(
            "Swapchain recreated: {}x{}, {} images",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count()
        );

        self.swapchain = Some(swapchain);
        self.resize_pending = false;
        self.stats.swapchain_recreations += 1;
        Ok(true)
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Wait for the device, then destroy everything in reverse acquisition
    /// order. Hands the device back so the caller decides when it goes.
    pub fn cleanup(self) -> EngineResult<G> {
        log::info!("Cleaning up engine resources...");

        let Engine {
            gpu,
            mut allocator,
            owned,
            swapchain,
            ..
        } = self;

        gpu.wait_idle()?;

        let swapchain_result = match swapchain {
            Some(swapchain) => swapchain.destroy(&gpu, &mut allocator),
            None => Ok(()),
        };
        let owned_result = owned.release(&gpu, &mut allocator);

        let leaks = allocator.report_leaks();
        if leaks > 0 {
            log::warn!("{} allocations outlived cleanup", leaks);
        }

        swapchain_result.and(owned_result)?;
        log::info!("Cleanup complete");
        Ok(gpu)
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// One per frame slot, in slot order.
    pub fn command_buffers(&self) -> Vec<vk::CommandBuffer> {
        self.frames.slots().iter().map(|slot| slot.command_buffer).collect()
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn live_allocations(&self) -> usize {
        self.allocator.live_allocations()
    }

    /// Every object the engine currently owns, each listed once.
    pub fn teardown_handles(&self) -> Vec<GpuHandle> {
        let mut handles = self.owned.handles();
        if let Some(swapchain) = &self.swapchain {
            handles.extend(swapchain.owned_handles());
        }
        handles
    }
}
