//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A bump heap ran out of space
    #[error("heap '{heap}' exhausted: requested {requested} bytes at offset {offset}, capacity {capacity}")]
    HeapExhausted {
        heap: &'static str,
        requested: u64,
        offset: u64,
        capacity: u64,
    },

    /// A descriptor heap has no free slot left
    #[error("descriptor heap '{0}' is full")]
    DescriptorHeapFull(&'static str),

    /// The CPU and GPU halves of a freed descriptor point at different slots
    #[error("descriptor free mismatch: cpu slot {cpu} vs gpu slot {gpu}")]
    DescriptorMismatch { cpu: u32, gpu: u32 },

    /// A freed descriptor does not name a live slot of this heap
    #[error("descriptor heap '{heap}': cpu address {cpu:#x} is not a live slot")]
    DescriptorNotLive { heap: &'static str, cpu: u64 },

    /// A command list operation was issued in the wrong recording state
    #[error("command '{name}' is {actual:?}, expected {expected:?}")]
    CommandState {
        name: String,
        expected: crate::types::CommandState,
        actual: crate::types::CommandState,
    },

    /// Render pass requested more color targets than the hardware limit
    #[error("render pass uses {0} color targets, maximum is {1}")]
    TooManyRenderTargets(usize, usize),

    /// CPU access to a buffer that lives in device-local memory
    #[error("buffer of kind {0:?} is not CPU mappable")]
    NotMappable(crate::types::BufferKind),

    /// Push constant payload exceeds the root signature budget
    #[error("push constant payload of {0} dwords exceeds the limit of {1}")]
    PushConstantOverflow(usize, usize),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
