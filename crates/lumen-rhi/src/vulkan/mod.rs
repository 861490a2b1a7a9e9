//! Vulkan backend, built on the `ash` bindings.

mod backend;
mod instance;
mod physical;

pub use backend::VulkanDevice;
pub use instance::Instance;
pub use physical::{select_physical_device, PhysicalDeviceInfo, QueueFamilies};
