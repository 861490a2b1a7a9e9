//! The Vulkan implementation of [`GpuDevice`].
//!
//! Heaps are single `VkDeviceMemory` allocations that resources bind into
//! at context-chosen offsets. Descriptors live in one bindless set whose
//! slot indices double as the "GPU addresses" shaders receive through push
//! constants. Fences are timeline semaphores, one per queue.

use std::io::Cursor;

use ash::vk;
use glam::UVec2;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::descriptor::DescriptorHeapInfo;
use crate::device::{
    AllocationInfo, GpuDevice, PassDesc, RawCommand, RawHeap, RawPipeline, RawResource, ViewClass,
};
use crate::error::{RhiError, RhiResult};
use crate::handle::Handle;
use crate::types::{
    ComputeShaderDesc, Format, GraphicsShaderDesc, HeapKind, LoadOp, PrimitiveTopology, QueueKind,
    ResourceState, Scissor, StoreOp, TextureDesc, Viewport, FRAME_COUNT,
    MAX_PUSH_CONSTANT_DWORDS,
};

use super::instance::Instance;
use super::physical::{select_physical_device, PhysicalDeviceInfo};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Slot capacities of the three descriptor heaps.
const VIEW_CAPACITY: u32 = 4096;
const RENDER_CAPACITY: u32 = 64;
const DEPTH_CAPACITY: u32 = 64;

/// Bindless set bindings.
const BUFFER_BINDING: u32 = 0;
const IMAGE_BINDING: u32 = 1;

struct HeapBlock {
    memory: vk::DeviceMemory,
    mapped: Option<*mut u8>,
}

enum VkResource {
    Buffer {
        buffer: vk::Buffer,
        heap: usize,
        offset: u64,
    },
    Image {
        image: vk::Image,
        /// Swapchain images are owned by the swapchain, not by us.
        owned: bool,
    },
    Dead,
}

struct VkCommand {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    queue: QueueKind,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

/// Vulkan backend for the render context.
pub struct VulkanDevice {
    // Field order is drop order; kept explicit in Drop instead.
    instance: Instance,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical: PhysicalDeviceInfo,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    graphics_queue: vk::Queue,
    transfer_queue: vk::Queue,

    swapchain: vk::SwapchainKHR,
    swapchain_images: Vec<vk::Image>,
    extent: vk::Extent2D,
    current_image: u32,
    /// Binary semaphores for image acquisition, cycled per acquire.
    image_available: Vec<vk::Semaphore>,
    acquire_slot: usize,
    /// The acquire semaphore the next graphics submit must wait on.
    pending_acquire: Option<vk::Semaphore>,
    /// Binary semaphores the present waits on, one per swapchain image.
    render_finished: Vec<vk::Semaphore>,
    /// Set once the current frame's submit has signaled its render_finished
    /// semaphore; a binary semaphore must not be signaled twice.
    render_finished_pending: bool,

    /// Timeline semaphores: graphics, transfer.
    timelines: [vk::Semaphore; 2],

    descriptor_pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,

    heaps: Vec<HeapBlock>,
    resources: Vec<VkResource>,
    commands: Vec<VkCommand>,
    pipelines: Vec<VkPipeline>,

    /// Render/depth/shader view tables indexed by descriptor slot.
    render_views: Vec<vk::ImageView>,
    depth_views: Vec<vk::ImageView>,
    image_views: Vec<vk::ImageView>,
}

fn to_vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
    }
}

fn to_vk_load(load: LoadOp) -> vk::AttachmentLoadOp {
    match load {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn to_vk_store(store: StoreOp) -> vk::AttachmentStoreOp {
    match store {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn to_vk_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::GENERAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn state_access(state: ResourceState) -> vk::AccessFlags2 {
    match state {
        ResourceState::Common => vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ResourceState::RenderTarget => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ResourceState::DepthWrite => vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::ShaderResource => vk::AccessFlags2::SHADER_READ,
        ResourceState::CopySrc => vk::AccessFlags2::TRANSFER_READ,
        ResourceState::CopyDst => vk::AccessFlags2::TRANSFER_WRITE,
        ResourceState::Present => vk::AccessFlags2::empty(),
    }
}

fn state_stage(state: ResourceState) -> vk::PipelineStageFlags2 {
    match state {
        ResourceState::Common => vk::PipelineStageFlags2::ALL_COMMANDS,
        ResourceState::RenderTarget => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthWrite => vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        ResourceState::ShaderResource => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        ResourceState::CopySrc | ResourceState::CopyDst => vk::PipelineStageFlags2::TRANSFER,
        ResourceState::Present => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
    }
}

fn queue_slot(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Graphics => 0,
        QueueKind::Transfer => 1,
    }
}

impl VulkanDevice {
    /// Creates the full Vulkan stack for a window: instance, surface,
    /// device, swapchain, bindless descriptor set and timeline semaphores.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        size: UVec2,
        enable_validation: bool,
    ) -> RhiResult<Self> {
        let instance = Instance::new(display_handle, enable_validation)?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle,
                window_handle,
                None,
            )
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?
        };
        let surface_loader =
            ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let physical = select_physical_device(instance.handle(), surface, &surface_loader)?;
        let device = Self::create_device(&instance, &physical)?;
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        let graphics_queue =
            unsafe { device.get_device_queue(physical.queue_families.graphics, 0) };
        let transfer_queue =
            unsafe { device.get_device_queue(physical.queue_families.transfer, 0) };

        let (swapchain, swapchain_images, extent) = Self::create_swapchain(
            &swapchain_loader,
            &surface_loader,
            surface,
            &physical,
            size,
            vk::SwapchainKHR::null(),
        )?;

        let mut image_available = Vec::with_capacity(FRAME_COUNT);
        let mut render_finished = Vec::with_capacity(swapchain_images.len());
        unsafe {
            for _ in 0..FRAME_COUNT {
                image_available
                    .push(device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?);
            }
            for _ in 0..swapchain_images.len() {
                render_finished
                    .push(device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?);
            }
        }

        let timelines = [
            Self::create_timeline(&device)?,
            Self::create_timeline(&device)?,
        ];

        let (descriptor_pool, set_layout, descriptor_set, pipeline_layout) =
            Self::create_bindless_set(&device)?;

        let mut this = Self {
            instance,
            surface_loader,
            surface,
            physical,
            device,
            swapchain_loader,
            graphics_queue,
            transfer_queue,
            swapchain,
            swapchain_images,
            extent,
            current_image: 0,
            image_available,
            acquire_slot: 0,
            pending_acquire: None,
            render_finished,
            render_finished_pending: false,
            timelines,
            descriptor_pool,
            set_layout,
            descriptor_set,
            pipeline_layout,
            heaps: Vec::new(),
            resources: Vec::new(),
            commands: Vec::new(),
            pipelines: Vec::new(),
            render_views: vec![vk::ImageView::null(); RENDER_CAPACITY as usize],
            depth_views: vec![vk::ImageView::null(); DEPTH_CAPACITY as usize],
            image_views: vec![vk::ImageView::null(); VIEW_CAPACITY as usize],
        };
        this.acquire_next()?;
        info!(
            width = extent.width,
            height = extent.height,
            images = this.swapchain_images.len(),
            "Vulkan device ready"
        );
        Ok(this)
    }

    fn create_device(
        instance: &Instance,
        physical: &PhysicalDeviceInfo,
    ) -> RhiResult<ash::Device> {
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .shader_sampled_image_array_non_uniform_indexing(true);

        // maintenance4 backs the memory requirement queries used for heap
        // placement before resources exist.
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true)
            .maintenance4(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        info!("Logical device created");
        Ok(device)
    }

    fn create_swapchain(
        swapchain_loader: &ash::khr::swapchain::Device,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical: &PhysicalDeviceInfo,
        size: UVec2,
        old: vk::SwapchainKHR,
    ) -> RhiResult<(vk::SwapchainKHR, Vec<vk::Image>, vk::Extent2D)> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical.device, surface)?
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: size.x.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: size.y.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = (FRAME_COUNT as u32).max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(to_vk_format(crate::context::BACKBUFFER_FORMAT))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        debug!(count = images.len(), "swapchain created");
        Ok((swapchain, images, extent))
    }

    fn create_timeline(device: &ash::Device) -> RhiResult<vk::Semaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        Ok(unsafe { device.create_semaphore(&create_info, None)? })
    }

    fn create_bindless_set(
        device: &ash::Device,
    ) -> RhiResult<(
        vk::DescriptorPool,
        vk::DescriptorSetLayout,
        vk::DescriptorSet,
        vk::PipelineLayout,
    )> {
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(VIEW_CAPACITY),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(VIEW_CAPACITY),
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
            2];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);

        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(BUFFER_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(VIEW_CAPACITY)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(VIEW_CAPACITY)
                .stage_flags(vk::ShaderStageFlags::ALL),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .push_next(&mut flags_info);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info)?[0] };

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size((MAX_PUSH_CONSTANT_DWORDS * 4) as u32)];
        let layout_create = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_create, None)? };

        Ok((descriptor_pool, set_layout, descriptor_set, pipeline_layout))
    }

    fn acquire_next(&mut self) -> RhiResult<()> {
        self.acquire_slot = (self.acquire_slot + 1) % self.image_available.len();
        let semaphore = self.image_available[self.acquire_slot];
        let (index, _suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )?
        };
        self.current_image = index;
        self.pending_acquire = Some(semaphore);
        Ok(())
    }

    fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<u32> {
        let memory = &self.physical.memory_properties;
        for i in 0..memory.memory_type_count {
            if type_bits & (1 << i) != 0
                && memory.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
            {
                return Ok(i);
            }
        }
        Err(RhiError::VulkanError(
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ))
    }

    fn buffer_create_info(size: u64) -> vk::BufferCreateInfo<'static> {
        vk::BufferCreateInfo::default()
            .size(size)
            .usage(
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::UNIFORM_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
    }

    fn image_create_info(desc: &TextureDesc) -> vk::ImageCreateInfo<'static> {
        let usage = if desc.format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        } else if desc.render_target {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        } else {
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
        };
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(to_vk_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.size.x,
                height: desc.size.y,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }

    /// Driver-reported requirements for a buffer that does not exist yet.
    fn buffer_requirements(&self, size: u64) -> vk::MemoryRequirements {
        let create_info = Self::buffer_create_info(size);
        let query = vk::DeviceBufferMemoryRequirements::default().create_info(&create_info);
        let mut reqs = vk::MemoryRequirements2::default();
        unsafe {
            self.device
                .get_device_buffer_memory_requirements(&query, &mut reqs)
        };
        reqs.memory_requirements
    }

    /// Driver-reported requirements for an image that does not exist yet.
    fn image_requirements(&self, desc: &TextureDesc) -> vk::MemoryRequirements {
        let create_info = Self::image_create_info(desc);
        let query = vk::DeviceImageMemoryRequirements::default().create_info(&create_info);
        let mut reqs = vk::MemoryRequirements2::default();
        unsafe {
            self.device
                .get_device_image_memory_requirements(&query, &mut reqs)
        };
        reqs.memory_requirements
    }

    /// Memory types every resource placed in a heap of `kind` can bind to.
    fn heap_type_bits(&self, kind: HeapKind) -> u32 {
        match kind {
            HeapKind::Buffer | HeapKind::Upload | HeapKind::Readback => {
                self.buffer_requirements(256).memory_type_bits
            }
            HeapKind::Texture => {
                // Color targets and depth images both land in this heap.
                let color = self.image_requirements(&TextureDesc {
                    size: UVec2::new(16, 16),
                    format: Format::Rgba8Unorm,
                    mip_levels: 1,
                    render_target: true,
                    resource: Handle::NULL,
                });
                let depth = self.image_requirements(&TextureDesc {
                    size: UVec2::new(16, 16),
                    format: Format::D32Float,
                    mip_levels: 1,
                    render_target: false,
                    resource: Handle::NULL,
                });
                color.memory_type_bits & depth.memory_type_bits
            }
        }
    }

    fn queue(&self, queue: QueueKind) -> vk::Queue {
        match queue {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Transfer => self.transfer_queue,
        }
    }

    fn buffer_of(&self, resource: RawResource) -> vk::Buffer {
        match &self.resources[resource.0 as usize] {
            VkResource::Buffer { buffer, .. } => *buffer,
            _ => vk::Buffer::null(),
        }
    }

    fn cmd_buffer(&self, cmd: RawCommand) -> vk::CommandBuffer {
        self.commands[cmd.0 as usize].buffer
    }

    fn create_shader_module(&self, code: &[u8]) -> RhiResult<vk::ShaderModule> {
        let words = ash::util::read_spv(&mut Cursor::new(code))
            .map_err(|e| RhiError::ShaderError(e.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        Ok(unsafe { self.device.create_shader_module(&create_info, None)? })
    }

    fn store_view(table: &mut [vk::ImageView], device: &ash::Device, slot: u32, view: vk::ImageView) {
        let old = std::mem::replace(&mut table[slot as usize], view);
        if old != vk::ImageView::null() {
            // Slot reuse after a LIFO free; the previous view is dead.
            unsafe { device.destroy_image_view(old, None) };
        }
    }

    fn make_image_view(
        &self,
        image: vk::Image,
        format: Format,
    ) -> RhiResult<vk::ImageView> {
        let aspect = if format.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(to_vk_format(format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        Ok(unsafe { self.device.create_image_view(&create_info, None)? })
    }
}

impl GpuDevice for VulkanDevice {
    fn frame_count(&self) -> usize {
        self.swapchain_images.len()
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.current_image
    }

    fn descriptor_heap_info(&self, class: ViewClass) -> DescriptorHeapInfo {
        // Slot indices are the addresses here; stride 1 keeps the CPU/GPU
        // agreement check meaningful without fabricating pointers.
        let capacity = match class {
            ViewClass::ShaderVisible => VIEW_CAPACITY,
            ViewClass::RenderTarget => RENDER_CAPACITY,
            ViewClass::DepthStencil => DEPTH_CAPACITY,
        };
        DescriptorHeapInfo {
            cpu_base: 0,
            gpu_base: 0,
            stride: 1,
            capacity,
        }
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64, name: &str) -> RhiResult<RawHeap> {
        let properties = match kind {
            HeapKind::Buffer | HeapKind::Texture => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HeapKind::Upload | HeapKind::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        };
        let memory_type = self.find_memory_type(self.heap_type_bits(kind), properties)?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };

        // Host-visible heaps stay persistently mapped.
        let mapped = if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
            };
            Some(ptr.cast::<u8>())
        } else {
            None
        };

        debug!(name, size, ?kind, "reserved heap");
        let id = self.heaps.len() as u64;
        self.heaps.push(HeapBlock { memory, mapped });
        Ok(RawHeap(id))
    }

    fn buffer_allocation_info(&self, size: u64) -> AllocationInfo {
        let reqs = self.buffer_requirements(size);
        let limits = &self.physical.properties.limits;
        // Placed offsets also serve as view offsets, so fold the view
        // alignment rules in alongside the bind alignment.
        let alignment = reqs
            .alignment
            .max(limits.min_storage_buffer_offset_alignment)
            .max(limits.min_uniform_buffer_offset_alignment);
        AllocationInfo {
            size: reqs.size,
            alignment,
        }
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> AllocationInfo {
        let reqs = self.image_requirements(desc);
        // Images share heaps with nothing linear, but keep the granularity
        // to stay clear of aliasing rules.
        let alignment = reqs
            .alignment
            .max(self.physical.properties.limits.buffer_image_granularity);
        AllocationInfo {
            size: reqs.size,
            alignment,
        }
    }

    fn create_buffer(
        &mut self,
        heap: RawHeap,
        offset: u64,
        size: u64,
        _name: &str,
    ) -> RhiResult<RawResource> {
        // Must stay in lockstep with `buffer_requirements`, which quoted
        // the placement size for this exact description.
        let create_info = Self::buffer_create_info(size);
        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };
        let heap_index = heap.0 as usize;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, self.heaps[heap_index].memory, offset)?
        };
        let id = self.resources.len() as u64;
        self.resources.push(VkResource::Buffer {
            buffer,
            heap: heap_index,
            offset,
        });
        Ok(RawResource(id))
    }

    fn create_texture(
        &mut self,
        heap: RawHeap,
        offset: u64,
        desc: &TextureDesc,
        _name: &str,
    ) -> RhiResult<RawResource> {
        // Must stay in lockstep with `image_requirements`, which quoted
        // the placement size for this exact description.
        let create_info = Self::image_create_info(desc);
        let image = unsafe { self.device.create_image(&create_info, None)? };
        unsafe {
            self.device
                .bind_image_memory(image, self.heaps[heap.0 as usize].memory, offset)?
        };
        let id = self.resources.len() as u64;
        self.resources.push(VkResource::Image { image, owned: true });
        Ok(RawResource(id))
    }

    fn swapchain_resource(&mut self, index: u32) -> RhiResult<RawResource> {
        let image = self.swapchain_images[index as usize];
        let id = self.resources.len() as u64;
        self.resources.push(VkResource::Image {
            image,
            owned: false,
        });
        Ok(RawResource(id))
    }

    fn destroy_resource(&mut self, resource: RawResource) {
        let entry = std::mem::replace(&mut self.resources[resource.0 as usize], VkResource::Dead);
        unsafe {
            match entry {
                VkResource::Buffer { buffer, .. } => self.device.destroy_buffer(buffer, None),
                VkResource::Image { image, owned: true } => {
                    self.device.destroy_image(image, None)
                }
                // Swapchain images die with the swapchain.
                VkResource::Image { owned: false, .. } | VkResource::Dead => {}
            }
        }
    }

    fn map(&mut self, resource: RawResource) -> RhiResult<*mut u8> {
        match &self.resources[resource.0 as usize] {
            VkResource::Buffer { heap, offset, .. } => match self.heaps[*heap].mapped {
                Some(base) => Ok(unsafe { base.add(*offset as usize) }),
                None => Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED)),
            },
            _ => Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED)),
        }
    }

    fn unmap(&mut self, _resource: RawResource) {
        // Host heaps are persistently mapped and coherent.
    }

    fn create_buffer_view(
        &mut self,
        resource: RawResource,
        offset: u64,
        size: u64,
        slot: u32,
    ) -> RhiResult<()> {
        let buffer = self.buffer_of(resource);
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(size)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(BUFFER_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        resource: RawResource,
        format: Format,
        slot: u32,
    ) -> RhiResult<()> {
        let VkResource::Image { image, .. } = &self.resources[resource.0 as usize] else {
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        };
        let view = self.make_image_view(*image, format)?;
        Self::store_view(&mut self.image_views, &self.device, slot, view);

        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(IMAGE_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn create_render_target_view(
        &mut self,
        resource: RawResource,
        format: Format,
        slot: u32,
    ) -> RhiResult<()> {
        let VkResource::Image { image, .. } = &self.resources[resource.0 as usize] else {
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        };
        let view = self.make_image_view(*image, format)?;
        Self::store_view(&mut self.render_views, &self.device, slot, view);
        Ok(())
    }

    fn create_depth_stencil_view(
        &mut self,
        resource: RawResource,
        format: Format,
        slot: u32,
    ) -> RhiResult<()> {
        let VkResource::Image { image, .. } = &self.resources[resource.0 as usize] else {
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        };
        let view = self.make_image_view(*image, format)?;
        Self::store_view(&mut self.depth_views, &self.device, slot, view);
        Ok(())
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<RawPipeline> {
        let vertex = self.create_shader_module(desc.vertex_code)?;
        let fragment = self.create_shader_module(desc.fragment_code)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(c"main"),
        ];

        // Vertex data is pulled from storage buffers; no vertex input state.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(to_vk_topology(desc.topology));
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachments = vec![
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA);
            desc.color_formats.len()
        ];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::PRIMITIVE_TOPOLOGY,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|&f| to_vk_format(f))
            .collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                desc.depth_format.map_or(vk::Format::UNDEFINED, to_vk_format),
            );

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RhiError::PipelineError(format!("{name}: {e}")))?
        };

        unsafe {
            self.device.destroy_shader_module(vertex, None);
            self.device.destroy_shader_module(fragment, None);
        }

        let id = self.pipelines.len() as u64;
        self.pipelines.push(VkPipeline {
            pipeline: pipelines[0],
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        });
        debug!(name, "graphics pipeline created");
        Ok(RawPipeline(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputeShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<RawPipeline> {
        let module = self.create_shader_module(desc.compute_code)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.pipeline_layout);
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RhiError::PipelineError(format!("{name}: {e}")))?
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        let id = self.pipelines.len() as u64;
        self.pipelines.push(VkPipeline {
            pipeline: pipelines[0],
            bind_point: vk::PipelineBindPoint::COMPUTE,
        });
        debug!(name, "compute pipeline created");
        Ok(RawPipeline(id))
    }

    fn create_command(&mut self, queue: QueueKind, _name: &str) -> RhiResult<RawCommand> {
        let family = match queue {
            QueueKind::Graphics => self.physical.queue_families.graphics,
            QueueKind::Transfer => self.physical.queue_families.transfer,
        };
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(family);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None)? };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { self.device.allocate_command_buffers(&alloc_info)?[0] };

        let id = self.commands.len() as u64;
        self.commands.push(VkCommand {
            pool,
            buffer,
            queue,
        });
        Ok(RawCommand(id))
    }

    fn reset_command(&mut self, cmd: RawCommand) -> RhiResult<()> {
        let entry = &self.commands[cmd.0 as usize];
        unsafe {
            self.device
                .reset_command_pool(entry.pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                entry.buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }

    fn close_command(&mut self, cmd: RawCommand) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(self.cmd_buffer(cmd))? };
        Ok(())
    }

    fn bind_globals(&mut self, cmd: RawCommand) {
        let buffer = self.cmd_buffer(cmd);
        let sets = [self.descriptor_set];
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &sets,
                &[],
            );
            self.device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }
    }

    fn cmd_barrier(
        &mut self,
        cmd: RawCommand,
        resource: RawResource,
        from: ResourceState,
        to: ResourceState,
    ) {
        let buffer = self.cmd_buffer(cmd);
        match &self.resources[resource.0 as usize] {
            VkResource::Image { image, .. } => {
                let aspect = if from == ResourceState::DepthWrite || to == ResourceState::DepthWrite
                {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                let image = *image;
                let barrier = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(state_stage(from))
                    .src_access_mask(state_access(from))
                    .dst_stage_mask(state_stage(to))
                    .dst_access_mask(state_access(to))
                    .old_layout(if from == ResourceState::Common {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        state_layout(from)
                    })
                    .new_layout(state_layout(to))
                    .image(image)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect)
                            .level_count(vk::REMAINING_MIP_LEVELS)
                            .layer_count(1),
                    );
                let barriers = [barrier];
                let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
                unsafe { self.device.cmd_pipeline_barrier2(buffer, &dependency) };
            }
            VkResource::Buffer {
                buffer: vk_buffer, ..
            } => {
                let barrier = vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(state_stage(from))
                    .src_access_mask(state_access(from))
                    .dst_stage_mask(state_stage(to))
                    .dst_access_mask(state_access(to))
                    .buffer(*vk_buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                let barriers = [barrier];
                let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
                unsafe { self.device.cmd_pipeline_barrier2(buffer, &dependency) };
            }
            VkResource::Dead => {}
        }
    }

    fn cmd_begin_pass(&mut self, cmd: RawCommand, pass: &PassDesc) {
        let buffer = self.cmd_buffer(cmd);
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = pass
            .colors
            .iter()
            .map(|color| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(self.render_views[color.view_slot as usize])
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(to_vk_load(color.load))
                    .store_op(to_vk_store(color.store))
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: color.clear,
                        },
                    })
            })
            .collect();

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: pass.extent.x,
                    height: pass.extent.y,
                },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        let depth_attachment;
        if let Some(depth) = &pass.depth {
            depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(self.depth_views[depth.view_slot as usize])
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(to_vk_load(depth.load))
                .store_op(to_vk_store(depth.store))
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: depth.clear_depth,
                        stencil: 0,
                    },
                });
            rendering_info = rendering_info.depth_attachment(&depth_attachment);
        }

        unsafe { self.device.cmd_begin_rendering(buffer, &rendering_info) };
    }

    fn cmd_end_pass(&mut self, cmd: RawCommand) {
        unsafe { self.device.cmd_end_rendering(self.cmd_buffer(cmd)) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: RawCommand, pipeline: RawPipeline) {
        let entry = &self.pipelines[pipeline.0 as usize];
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd_buffer(cmd), entry.bind_point, entry.pipeline)
        };
    }

    fn cmd_set_viewport(&mut self, cmd: RawCommand, viewport: Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            // Flip so clip space matches the left-handed convention.
            y: viewport.y + viewport.height,
            width: viewport.width,
            height: -viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe {
            self.device
                .cmd_set_viewport(self.cmd_buffer(cmd), 0, &[vk_viewport])
        };
    }

    fn cmd_set_scissor(&mut self, cmd: RawCommand, scissor: Scissor) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(self.cmd_buffer(cmd), 0, &[rect]) };
    }

    fn cmd_set_topology(&mut self, cmd: RawCommand, topology: PrimitiveTopology) {
        unsafe {
            self.device
                .cmd_set_primitive_topology(self.cmd_buffer(cmd), to_vk_topology(topology))
        };
    }

    fn cmd_push_constants(&mut self, cmd: RawCommand, data: &[u32]) {
        unsafe {
            self.device.cmd_push_constants(
                self.cmd_buffer(cmd),
                self.pipeline_layout,
                vk::ShaderStageFlags::ALL,
                0,
                bytemuck::cast_slice(data),
            )
        };
    }

    fn cmd_draw(
        &mut self,
        cmd: RawCommand,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                self.cmd_buffer(cmd),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: RawCommand,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd_buffer(cmd),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_dispatch(&mut self, cmd: RawCommand, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(self.cmd_buffer(cmd), x, y, z) };
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: RawCommand,
        src: RawResource,
        src_offset: u64,
        dst: RawResource,
        dst_offset: u64,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                self.cmd_buffer(cmd),
                self.buffer_of(src),
                self.buffer_of(dst),
                &[region],
            )
        };
    }

    fn cmd_copy_resource(&mut self, cmd: RawCommand, src: RawResource, dst: RawResource) {
        let (VkResource::Image { image: src_image, .. }, VkResource::Image { image: dst_image, .. }) = (
            &self.resources[src.0 as usize],
            &self.resources[dst.0 as usize],
        ) else {
            return;
        };
        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_image(
                self.cmd_buffer(cmd),
                *src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                *dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn submit(&mut self, queue: QueueKind, commands: &[RawCommand]) -> RhiResult<()> {
        let buffer_infos: Vec<vk::CommandBufferSubmitInfo> = commands
            .iter()
            .map(|&cmd| {
                debug_assert_eq!(self.commands[cmd.0 as usize].queue, queue);
                vk::CommandBufferSubmitInfo::default().command_buffer(self.cmd_buffer(cmd))
            })
            .collect();

        let mut wait_infos = Vec::new();
        let mut signal_infos = Vec::new();
        if queue == QueueKind::Graphics {
            if let Some(acquire) = self.pending_acquire.take() {
                wait_infos.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(acquire)
                        .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
                );
            }
            if !self.render_finished_pending {
                signal_infos.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(self.render_finished[self.current_image as usize])
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                );
                self.render_finished_pending = true;
            }
        }

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&buffer_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device
                .queue_submit2(self.queue(queue), &[submit_info], vk::Fence::null())?
        };
        Ok(())
    }

    fn signal(&mut self, queue: QueueKind, value: u64) -> RhiResult<()> {
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.timelines[queue_slot(queue)])
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit_info = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device
                .queue_submit2(self.queue(queue), &[submit_info], vk::Fence::null())?
        };
        Ok(())
    }

    fn completed_value(&self, queue: QueueKind) -> u64 {
        unsafe {
            self.device
                .get_semaphore_counter_value(self.timelines[queue_slot(queue)])
                .unwrap_or(0)
        }
    }

    fn wait(&mut self, queue: QueueKind, value: u64) -> RhiResult<()> {
        let semaphores = [self.timelines[queue_slot(queue)]];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }

    fn present(&mut self) -> RhiResult<()> {
        let wait_semaphores = [self.render_finished[self.current_image as usize]];
        let swapchains = [self.swapchain];
        let indices = [self.current_image];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.graphics_queue, &present_info)
        };
        match result {
            Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => {}
            Err(e) => return Err(e.into()),
        }
        self.render_finished_pending = false;
        self.acquire_next()
    }

    fn resize_swapchain(&mut self, size: UVec2) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };

        let old = self.swapchain;
        let (swapchain, images, extent) = Self::create_swapchain(
            &self.swapchain_loader,
            &self.surface_loader,
            self.surface,
            &self.physical,
            size,
            old,
        )?;
        unsafe { self.swapchain_loader.destroy_swapchain(old, None) };

        self.swapchain = swapchain;
        self.swapchain_images = images;
        self.extent = extent;
        self.render_finished_pending = false;
        self.pending_acquire = None;

        // Per-image present semaphores must match the new image count.
        unsafe {
            for semaphore in self.render_finished.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for _ in 0..self.swapchain_images.len() {
                self.render_finished
                    .push(self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?);
            }
        }
        self.acquire_next()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            for pipeline in &self.pipelines {
                self.device.destroy_pipeline(pipeline.pipeline, None);
            }
            for command in &self.commands {
                self.device.destroy_command_pool(command.pool, None);
            }
            for view in self
                .render_views
                .iter()
                .chain(&self.depth_views)
                .chain(&self.image_views)
            {
                if *view != vk::ImageView::null() {
                    self.device.destroy_image_view(*view, None);
                }
            }
            for resource in std::mem::take(&mut self.resources) {
                match resource {
                    VkResource::Buffer { buffer, .. } => self.device.destroy_buffer(buffer, None),
                    VkResource::Image { image, owned: true } => {
                        self.device.destroy_image(image, None)
                    }
                    _ => {}
                }
            }
            for heap in &self.heaps {
                if heap.mapped.is_some() {
                    self.device.unmap_memory(heap.memory);
                }
                self.device.free_memory(heap.memory, None);
            }
            for semaphore in self
                .image_available
                .iter()
                .chain(&self.render_finished)
                .chain(&self.timelines)
            {
                self.device.destroy_semaphore(*semaphore, None);
            }
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan device destroyed");
    }
}

// Safety: every Vulkan handle inside is Send; the mapped pointers refer to
// device memory owned by this struct.
unsafe impl Send for VulkanDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_format_mapping_is_exhaustive() {
        for format in [
            Format::Rgba8Unorm,
            Format::Bgra8Unorm,
            Format::Rgba16Float,
            Format::Rgba32Float,
            Format::R32Float,
            Format::R32Uint,
            Format::D32Float,
        ] {
            assert_ne!(to_vk_format(format), vk::Format::UNDEFINED);
        }
    }

    #[test]
    fn test_create_infos_match_resource_roles() {
        // The same create-infos feed both the requirement query and the
        // actual creation, so the usage flags must follow the description.
        let info = VulkanDevice::buffer_create_info(1024);
        assert_eq!(info.size, 1024);
        assert!(info.usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(info.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let depth = VulkanDevice::image_create_info(&TextureDesc {
            size: UVec2::new(64, 64),
            format: Format::D32Float,
            mip_levels: 1,
            render_target: false,
            resource: Handle::NULL,
        });
        assert!(depth
            .usage
            .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));

        let target = VulkanDevice::image_create_info(&TextureDesc {
            size: UVec2::new(64, 64),
            format: Format::Rgba8Unorm,
            mip_levels: 1,
            render_target: true,
            resource: Handle::NULL,
        });
        assert!(target.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert_eq!(target.extent.width, 64);
    }

    #[test]
    fn test_present_state_maps_to_present_layout() {
        assert_eq!(
            state_layout(ResourceState::Present),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            state_layout(ResourceState::RenderTarget),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }
}
