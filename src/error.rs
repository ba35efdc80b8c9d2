// Engine error type
//
// Fatal setup failures, invalid inputs and lifecycle misuse. Transient
// presentation conditions (out-of-date / suboptimal swapchain) are NOT
// errors: they come back as AcquireOutcome / PresentOutcome values.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("No Vulkan-capable GPU found")]
    NoAdapter,

    #[error("No queue family supports {0}")]
    QueueFamilyMissing(&'static str),

    #[error("GPU is missing required feature: {0}")]
    MissingFeature(&'static str),

    /// Shader blob missing or not valid SPIR-V
    #[error("Failed to load shader blob {path:?}: {source}")]
    ShaderBlob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Window handle type is not supported on this platform")]
    UnsupportedSurface,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Asset error: {0}")]
    Asset(String),

    /// A destroy call for a handle this engine never created (or already freed)
    #[error("Unknown GPU handle: {0}")]
    UnknownHandle(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
