//! Physical device (GPU) selection.
//!
//! Enumerates the available GPUs, filters out those that cannot present to
//! the surface or lack the queue families the context needs, and prefers
//! discrete hardware among the survivors.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};

/// Queue family indices the context uses.
///
/// Graphics and present must come from the same family; a dedicated
/// transfer family is used when the hardware has one, otherwise transfers
/// share the graphics family.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamilies {
    /// Family supporting graphics, compute and presentation.
    pub graphics: u32,
    /// Family used for transfer work.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Returns the unique family indices, for device creation.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.transfer {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.transfer]
        }
    }
}

/// The selected GPU and everything needed to build a logical device on it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }
}

/// Selects the most suitable GPU for the given surface.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device supports graphics plus
/// presentation on one queue family.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    debug!("Found {} physical device(s)", devices.len());

    let mut best: Option<(u32, PhysicalDeviceInfo)> = None;
    for device in devices {
        let Some(queue_families) = find_queue_families(instance, device, surface, surface_loader)?
        else {
            continue;
        };

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(device) };

        let info = PhysicalDeviceInfo {
            device,
            properties,
            memory_properties,
            queue_families,
        };

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 10,
        };
        if queue_families.transfer != queue_families.graphics {
            score += 50;
        }

        debug!(name = info.device_name(), score, "candidate GPU");
        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, info));
        }
    }

    let (_, info) = best.ok_or(RhiError::NoSuitableGpu)?;
    info!(
        name = info.device_name(),
        graphics_family = info.queue_families.graphics,
        transfer_family = info.queue_families.transfer,
        "selected GPU"
    );
    Ok(info)
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<QueueFamilies>> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut graphics = None;
    let mut dedicated_transfer = None;
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
            let presents = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)?
            };
            if presents {
                graphics = Some(index);
            }
        }
        // A transfer-only family is the DMA engine; prefer it for uploads.
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && !family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        {
            dedicated_transfer = Some(index);
        }
    }

    Ok(graphics.map(|graphics| QueueFamilies {
        graphics,
        transfer: dedicated_transfer.unwrap_or(graphics),
    }))
}
