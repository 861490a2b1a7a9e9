//! GPU render context abstraction (Render Hardware Interface).
//!
//! This crate manages GPU resources behind typed handles:
//! - Handle pools and typed handles
//! - Bump-pointer heap placement
//! - Descriptor slot allocation with LIFO recycling
//! - Resource state tracking and barrier planning
//! - Fence-paced frames in flight and swapchain resizing
//!
//! The [`context::RenderContext`] is generic over [`device::GpuDevice`];
//! production uses [`vulkan::VulkanDevice`], tests use [`null::NullDevice`].

mod error;

pub mod context;
pub mod descriptor;
pub mod device;
pub mod handle;
pub mod heap;
pub mod null;
pub mod state;
pub mod types;
pub mod vulkan;

pub use context::RenderContext;
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
