//! The device trait the render context drives.
//!
//! [`GpuDevice`] is the seam between the portable bookkeeping layer (handle
//! pools, heap placement, descriptor slots, state tracking, frame pacing)
//! and a concrete backend. The context is generic over it and monomorphizes
//! per backend; nothing downcasts at runtime.
//!
//! Implementations: the Vulkan backend in [`crate::vulkan`], and the
//! headless [`crate::null::NullDevice`] used by tests.

use glam::UVec2;

use crate::descriptor::DescriptorHeapInfo;
use crate::error::RhiResult;
use crate::types::{
    ComputeShaderDesc, Format, GraphicsShaderDesc, HeapKind, LoadOp, PrimitiveTopology, QueueKind,
    ResourceState, Scissor, StoreOp, TextureDesc, Viewport,
};

/// Opaque backend identifier for a memory heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawHeap(pub u64);

/// Opaque backend identifier for a buffer, texture or swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawResource(pub u64);

/// Opaque backend identifier for a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPipeline(pub u64);

/// Opaque backend identifier for a command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawCommand(pub u64);

/// The three descriptor heap classes a device exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewClass {
    /// Shader-visible views of buffers and textures.
    ShaderVisible,
    /// Render target views.
    RenderTarget,
    /// Depth stencil views.
    DepthStencil,
}

/// Size and alignment the device requires for a placement.
#[derive(Clone, Copy, Debug)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

/// One color attachment of a resolved render pass, identified by its slot
/// in the render target descriptor heap.
#[derive(Clone, Copy, Debug)]
pub struct PassColor {
    pub view_slot: u32,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: [f32; 4],
}

/// The depth attachment of a resolved render pass.
#[derive(Clone, Copy, Debug)]
pub struct PassDepth {
    pub view_slot: u32,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

/// A render pass with every handle resolved down to descriptor slots.
#[derive(Clone, Debug)]
pub struct PassDesc {
    pub colors: Vec<PassColor>,
    pub depth: Option<PassDepth>,
    pub extent: UVec2,
}

/// Backend contract for the render context.
///
/// The context owns all cross-resource bookkeeping; a device only has to
/// create raw objects, record commands and run queues. Fence values are
/// monotonic per queue: `signal` enqueues a signal of `value` and
/// `completed_value` reports the highest value the queue has reached.
pub trait GpuDevice {
    /// Number of swapchain images, and therefore frames in flight.
    fn frame_count(&self) -> usize;

    /// Index of the swapchain image the next present will show.
    fn current_backbuffer_index(&self) -> u32;

    /// Base addresses, stride and capacity of one descriptor heap.
    fn descriptor_heap_info(&self, class: ViewClass) -> DescriptorHeapInfo;

    // Memory

    fn create_heap(&mut self, kind: HeapKind, size: u64, name: &str) -> RhiResult<RawHeap>;
    fn buffer_allocation_info(&self, size: u64) -> AllocationInfo;
    fn texture_allocation_info(&self, desc: &TextureDesc) -> AllocationInfo;

    // Resources

    fn create_buffer(
        &mut self,
        heap: RawHeap,
        offset: u64,
        size: u64,
        name: &str,
    ) -> RhiResult<RawResource>;
    fn create_texture(
        &mut self,
        heap: RawHeap,
        offset: u64,
        desc: &TextureDesc,
        name: &str,
    ) -> RhiResult<RawResource>;
    /// The backbuffer image at `index`.
    fn swapchain_resource(&mut self, index: u32) -> RhiResult<RawResource>;
    fn destroy_resource(&mut self, resource: RawResource);

    fn map(&mut self, resource: RawResource) -> RhiResult<*mut u8>;
    fn unmap(&mut self, resource: RawResource);

    // Views

    fn create_buffer_view(
        &mut self,
        resource: RawResource,
        offset: u64,
        size: u64,
        slot: u32,
    ) -> RhiResult<()>;
    fn create_texture_view(&mut self, resource: RawResource, format: Format, slot: u32)
        -> RhiResult<()>;
    fn create_render_target_view(
        &mut self,
        resource: RawResource,
        format: Format,
        slot: u32,
    ) -> RhiResult<()>;
    fn create_depth_stencil_view(
        &mut self,
        resource: RawResource,
        format: Format,
        slot: u32,
    ) -> RhiResult<()>;

    // Pipelines

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<RawPipeline>;
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputeShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<RawPipeline>;

    // Command lists

    fn create_command(&mut self, queue: QueueKind, name: &str) -> RhiResult<RawCommand>;
    fn reset_command(&mut self, cmd: RawCommand) -> RhiResult<()>;
    fn close_command(&mut self, cmd: RawCommand) -> RhiResult<()>;
    /// Binds the global descriptor state (root layout and shader-visible
    /// heap) on an open command list.
    fn bind_globals(&mut self, cmd: RawCommand);

    // Recording

    fn cmd_barrier(&mut self, cmd: RawCommand, resource: RawResource, from: ResourceState, to: ResourceState);
    fn cmd_begin_pass(&mut self, cmd: RawCommand, pass: &PassDesc);
    fn cmd_end_pass(&mut self, cmd: RawCommand);
    fn cmd_bind_pipeline(&mut self, cmd: RawCommand, pipeline: RawPipeline);
    fn cmd_set_viewport(&mut self, cmd: RawCommand, viewport: Viewport);
    fn cmd_set_scissor(&mut self, cmd: RawCommand, scissor: Scissor);
    fn cmd_set_topology(&mut self, cmd: RawCommand, topology: PrimitiveTopology);
    fn cmd_push_constants(&mut self, cmd: RawCommand, data: &[u32]);
    fn cmd_draw(
        &mut self,
        cmd: RawCommand,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &mut self,
        cmd: RawCommand,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&mut self, cmd: RawCommand, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(
        &mut self,
        cmd: RawCommand,
        src: RawResource,
        src_offset: u64,
        dst: RawResource,
        dst_offset: u64,
        size: u64,
    );
    /// Whole-resource copy, used for the swapchain blit.
    fn cmd_copy_resource(&mut self, cmd: RawCommand, src: RawResource, dst: RawResource);

    // Queues

    fn submit(&mut self, queue: QueueKind, commands: &[RawCommand]) -> RhiResult<()>;
    fn signal(&mut self, queue: QueueKind, value: u64) -> RhiResult<()>;
    fn completed_value(&self, queue: QueueKind) -> u64;
    /// Blocks until the queue's completed value reaches `value`.
    fn wait(&mut self, queue: QueueKind, value: u64) -> RhiResult<()>;

    // Swapchain

    fn present(&mut self) -> RhiResult<()>;
    /// Recreates the swapchain at `size`. Existing swapchain images become
    /// invalid; the caller re-fetches them via [`GpuDevice::swapchain_resource`].
    fn resize_swapchain(&mut self, size: UVec2) -> RhiResult<()>;
}
