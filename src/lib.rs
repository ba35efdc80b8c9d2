// =============================================================================
// VK-ENGINE - a minimal Vulkan renderer
// =============================================================================
//
// LAYERS:
// ┌─────────────────────────────────────────────────────────────────┐
// │  engine (init / draw_frame / resize / wait_idle / cleanup)      │
// │    └── frame scheduler + command recorder                       │
// │          └── swapchain, pipeline, descriptors, meshes, texture  │
// │                └── resource allocator + teardown list           │
// │                      └── Gpu trait (backend::VulkanDevice or    │
// │                          null::NullGpu)                         │
// └─────────────────────────────────────────────────────────────────┘
//
// The core only ever talks to the device through `gpu::Gpu`, which is what
// lets the whole frame protocol run against the simulated device in tests.
//
// =============================================================================

pub mod adapter;
pub mod allocator;
pub mod assets;
pub mod backend;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod mesh;
pub mod null;
pub mod pipeline;
pub mod recorder;
pub mod swapchain;
pub mod teardown;
pub mod texture;

pub use backend::{DeviceSettings, VulkanDevice};
pub use engine::{Engine, EngineConfig, FrameOutcome, FrameStats, SceneAssets, SkipReason};
pub use error::{EngineError, EngineResult};
pub use gpu::Gpu;
pub use mesh::{MeshData, Vertex};
pub use null::{NullGpu, NullGpuConfig};
pub use swapchain::PresentModePreference;
pub use texture::TextureData;
