//! The render context: handle-indexed resource manager over a [`GpuDevice`].
//!
//! A `RenderContext` owns every GPU object the application creates and hands
//! out typed [`Handle`]s instead of raw objects. Internally it combines:
//!
//! - append-only handle pools ([`crate::handle`])
//! - bump-pointer placement in pre-reserved heaps ([`crate::heap`])
//! - descriptor slot allocation with LIFO recycling ([`crate::descriptor`])
//! - per-resource state tracking for barriers ([`crate::state`])
//! - fence-paced frames in flight ([`crate::types::FRAME_COUNT`])
//!
//! The context is generic over its device and monomorphizes per backend, so
//! test code running on [`crate::null::NullDevice`] exercises exactly the
//! bookkeeping the Vulkan backend runs in production.

use glam::UVec2;
use tracing::{debug, info};

use crate::descriptor::DescriptorAllocator;
use crate::device::{GpuDevice, PassColor, PassDepth, PassDesc, RawCommand, RawPipeline, RawResource, ViewClass};
use crate::error::{RhiError, RhiResult};
use crate::handle::{
    BufferTag, CommandTag, DepthStencilTag, Handle, Pool, RenderTargetTag, ResourceTag, ShaderTag,
    TextureTag,
};
use crate::heap::HeapAllocator;
use crate::state::plan_transition;
use crate::types::{
    BufferDesc, BufferKind, ColorAttachment, CommandState, ContextConfig, DepthStencilDesc, Format,
    FrameData, GraphicsShaderDesc, ComputeShaderDesc, HeapKind, PrimitiveTopology, QueueKind,
    RenderPassDesc, RenderTargetDesc, ResourceState, Scissor, TextureDesc, Viewport,
    MAX_PUSH_CONSTANT_DWORDS, MAX_RENDER_TARGETS,
};

/// Format every swapchain backbuffer uses.
pub const BACKBUFFER_FORMAT: Format = Format::Bgra8Unorm;

struct ResourceEntry {
    raw: RawResource,
    state: ResourceState,
}

struct CommandEntry {
    raw: RawCommand,
    queue: QueueKind,
    state: CommandState,
    name: String,
}

struct BufferEntry {
    resource: Handle<ResourceTag>,
    view: crate::descriptor::Descriptor,
    kind: BufferKind,
    size: u64,
}

struct TextureEntry {
    resource: Handle<ResourceTag>,
    view: crate::descriptor::Descriptor,
}

struct RenderTargetEntry {
    resource: Handle<ResourceTag>,
    render_view: crate::descriptor::Descriptor,
    texture_view: crate::descriptor::Descriptor,
    size: UVec2,
}

struct DepthStencilEntry {
    resource: Handle<ResourceTag>,
    depth_view: crate::descriptor::Descriptor,
    size: UVec2,
}

/// Handle-indexed GPU resource manager with fence-paced frames in flight.
pub struct RenderContext<D: GpuDevice> {
    device: D,

    buffer_heap: HeapAllocator,
    texture_heap: HeapAllocator,
    upload_heap: HeapAllocator,
    readback_heap: HeapAllocator,

    view_allocator: DescriptorAllocator,
    render_allocator: DescriptorAllocator,
    depth_allocator: DescriptorAllocator,

    resources: Pool<ResourceTag, ResourceEntry>,
    commands: Pool<CommandTag, CommandEntry>,
    buffers: Pool<BufferTag, BufferEntry>,
    textures: Pool<TextureTag, TextureEntry>,
    render_targets: Pool<RenderTargetTag, RenderTargetEntry>,
    depth_stencils: Pool<DepthStencilTag, DepthStencilEntry>,
    shaders: Pool<ShaderTag, RawPipeline>,

    frames: Vec<FrameData>,
    frame_index: usize,
    graphics_fence: u64,
    transfer_fence: u64,

    size: UVec2,
}

impl<D: GpuDevice> RenderContext<D> {
    /// Builds a context over `device`: reserves the four placement heaps,
    /// sets up the descriptor allocators, and creates per-frame command
    /// lists and backbuffer render targets.
    pub fn new(mut device: D, config: ContextConfig, size: UVec2) -> RhiResult<Self> {
        let buffer_heap = HeapAllocator::new(
            device.create_heap(HeapKind::Buffer, config.buffer_heap_size, "buffer heap")?,
            "buffer",
            config.buffer_heap_size,
        );
        let texture_heap = HeapAllocator::new(
            device.create_heap(HeapKind::Texture, config.texture_heap_size, "texture heap")?,
            "texture",
            config.texture_heap_size,
        );
        let upload_heap = HeapAllocator::new(
            device.create_heap(HeapKind::Upload, config.upload_heap_size, "upload heap")?,
            "upload",
            config.upload_heap_size,
        );
        let readback_heap = HeapAllocator::new(
            device.create_heap(HeapKind::Readback, config.readback_heap_size, "readback heap")?,
            "readback",
            config.readback_heap_size,
        );

        let mut view_info = device.descriptor_heap_info(ViewClass::ShaderVisible);
        view_info.capacity = view_info.capacity.min(config.view_descriptor_count);
        let mut render_info = device.descriptor_heap_info(ViewClass::RenderTarget);
        render_info.capacity = render_info.capacity.min(config.render_descriptor_count);
        let mut depth_info = device.descriptor_heap_info(ViewClass::DepthStencil);
        depth_info.capacity = depth_info.capacity.min(config.depth_descriptor_count);

        let mut ctx = Self {
            device,
            buffer_heap,
            texture_heap,
            upload_heap,
            readback_heap,
            view_allocator: DescriptorAllocator::new("view", view_info),
            render_allocator: DescriptorAllocator::new("render target", render_info),
            depth_allocator: DescriptorAllocator::new("depth stencil", depth_info),
            resources: Pool::new(),
            commands: Pool::new(),
            buffers: Pool::new(),
            textures: Pool::new(),
            render_targets: Pool::new(),
            depth_stencils: Pool::new(),
            shaders: Pool::new(),
            frames: Vec::new(),
            frame_index: 0,
            graphics_fence: 0,
            transfer_fence: 0,
            size,
        };
        ctx.create_frame_data()?;
        info!(
            width = size.x,
            height = size.y,
            frames = ctx.frames.len(),
            "render context created"
        );
        Ok(ctx)
    }

    fn create_frame_data(&mut self) -> RhiResult<()> {
        for i in 0..self.device.frame_count() {
            let command = self.create_command(QueueKind::Graphics, &format!("frame command {i}"))?;
            let backbuffer = self.device.swapchain_resource(i as u32)?;
            let resource = self.resources.push(ResourceEntry {
                raw: backbuffer,
                state: ResourceState::Common,
            });
            let render_target = self.create_render_target(&RenderTargetDesc {
                size: self.size,
                format: BACKBUFFER_FORMAT,
                resource,
            })?;
            self.frames.push(FrameData {
                command,
                render_target,
                fence_value: 0,
            });
        }
        self.frame_index = self.device.current_backbuffer_index() as usize;
        Ok(())
    }

    // Accessors

    /// The backend device. Tests use this to inspect recorded work.
    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Index of the frame currently being recorded.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Bookkeeping for the current frame.
    #[inline]
    pub fn frame_data(&self) -> FrameData {
        self.frames[self.frame_index]
    }

    /// Bookkeeping for an arbitrary frame slot.
    #[inline]
    pub fn frame_data_at(&self, index: usize) -> FrameData {
        self.frames[index]
    }

    /// Last fence value this context signaled on `queue`.
    #[inline]
    pub fn fence_value(&self, queue: QueueKind) -> u64 {
        match queue {
            QueueKind::Graphics => self.graphics_fence,
            QueueKind::Transfer => self.transfer_fence,
        }
    }

    /// Current swapchain extent.
    #[inline]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    // Resource creation

    /// Creates a buffer and its shader view.
    ///
    /// The backing memory is placed in the heap matching `desc.kind` unless
    /// `desc.resource` names an existing resource to view instead.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::HeapExhausted`] if the backing heap has no room
    /// left, or [`RhiError::DescriptorHeapFull`] if no view slot is free.
    pub fn create_buffer(&mut self, desc: &BufferDesc, name: &str) -> RhiResult<Handle<BufferTag>> {
        let size = desc.size();
        let resource = if desc.resource.is_null() {
            let info = self.device.buffer_allocation_info(size);
            let heap = match desc.kind {
                BufferKind::Storage | BufferKind::Uniform => &mut self.buffer_heap,
                BufferKind::Staging => &mut self.upload_heap,
                BufferKind::Readback => &mut self.readback_heap,
            };
            let offset = heap.place(info.size, info.alignment)?;
            let raw = self.device.create_buffer(heap.raw(), offset, size, name)?;
            self.resources.push(ResourceEntry {
                raw,
                state: ResourceState::Common,
            })
        } else {
            desc.resource
        };

        let view = self.view_allocator.allocate()?;
        let raw = self.resources.get(resource).raw;
        self.device.create_buffer_view(
            raw,
            desc.first_element * desc.stride,
            size,
            self.view_allocator.slot_of(view),
        )?;

        debug!(name, size, kind = ?desc.kind, "created buffer");
        Ok(self.buffers.push(BufferEntry {
            resource,
            view,
            kind: desc.kind,
            size,
        }))
    }

    /// Creates a texture and its shader view.
    pub fn create_texture(
        &mut self,
        desc: &TextureDesc,
        name: &str,
    ) -> RhiResult<Handle<TextureTag>> {
        let resource = if desc.resource.is_null() {
            let info = self.device.texture_allocation_info(desc);
            let offset = self.texture_heap.place(info.size, info.alignment)?;
            let raw = self
                .device
                .create_texture(self.texture_heap.raw(), offset, desc, name)?;
            self.resources.push(ResourceEntry {
                raw,
                state: ResourceState::Common,
            })
        } else {
            desc.resource
        };

        let view = self.view_allocator.allocate()?;
        let raw = self.resources.get(resource).raw;
        self.device
            .create_texture_view(raw, desc.format, self.view_allocator.slot_of(view))?;

        debug!(name, ?desc.size, "created texture");
        Ok(self.textures.push(TextureEntry { resource, view }))
    }

    /// Creates a render target: a color texture plus a render view and a
    /// shader view of it.
    ///
    /// Pass an existing resource (e.g. a swapchain image) in
    /// `desc.resource` to view it instead of allocating a fresh texture.
    pub fn create_render_target(
        &mut self,
        desc: &RenderTargetDesc,
    ) -> RhiResult<Handle<RenderTargetTag>> {
        let resource = if desc.resource.is_null() {
            let tex_desc = TextureDesc {
                size: desc.size,
                format: desc.format,
                mip_levels: 1,
                render_target: true,
                resource: Handle::NULL,
            };
            let info = self.device.texture_allocation_info(&tex_desc);
            let offset = self.texture_heap.place(info.size, info.alignment)?;
            let raw =
                self.device
                    .create_texture(self.texture_heap.raw(), offset, &tex_desc, "render target")?;
            self.resources.push(ResourceEntry {
                raw,
                state: ResourceState::Common,
            })
        } else {
            desc.resource
        };
        let raw = self.resources.get(resource).raw;

        let render_view = self.render_allocator.allocate()?;
        self.device
            .create_render_target_view(raw, desc.format, self.render_allocator.slot_of(render_view))?;
        let texture_view = self.view_allocator.allocate()?;
        self.device
            .create_texture_view(raw, desc.format, self.view_allocator.slot_of(texture_view))?;

        Ok(self.render_targets.push(RenderTargetEntry {
            resource,
            render_view,
            texture_view,
            size: desc.size,
        }))
    }

    /// Creates a depth stencil target and its depth view.
    pub fn create_depth_stencil(
        &mut self,
        desc: &DepthStencilDesc,
    ) -> RhiResult<Handle<DepthStencilTag>> {
        let resource = if desc.resource.is_null() {
            let tex_desc = TextureDesc {
                size: desc.size,
                format: desc.format,
                mip_levels: 1,
                render_target: false,
                resource: Handle::NULL,
            };
            let info = self.device.texture_allocation_info(&tex_desc);
            let offset = self.texture_heap.place(info.size, info.alignment)?;
            let raw =
                self.device
                    .create_texture(self.texture_heap.raw(), offset, &tex_desc, "depth stencil")?;
            self.resources.push(ResourceEntry {
                raw,
                state: ResourceState::Common,
            })
        } else {
            desc.resource
        };
        let raw = self.resources.get(resource).raw;

        let depth_view = self.depth_allocator.allocate()?;
        self.device
            .create_depth_stencil_view(raw, desc.format, self.depth_allocator.slot_of(depth_view))?;

        Ok(self.depth_stencils.push(DepthStencilEntry {
            resource,
            depth_view,
            size: desc.size,
        }))
    }

    /// Destroys a buffer: returns its shader view to the descriptor
    /// allocator and releases the device object. The heap bytes stay
    /// placed; offsets never rewind.
    pub fn destroy_buffer(&mut self, handle: Handle<BufferTag>) -> RhiResult<()> {
        let entry = self.buffers.get(handle);
        let (view, resource) = (entry.view, entry.resource);
        self.view_allocator.free(view)?;
        let raw = self.resources.get(resource).raw;
        self.device.destroy_resource(raw);
        Ok(())
    }

    /// Destroys a render target: returns its descriptors to their
    /// allocators and releases the backing resource.
    pub fn destroy_render_target(&mut self, handle: Handle<RenderTargetTag>) -> RhiResult<()> {
        let entry = self.render_targets.get(handle);
        let (render_view, texture_view, resource) =
            (entry.render_view, entry.texture_view, entry.resource);
        self.render_allocator.free(render_view)?;
        self.view_allocator.free(texture_view)?;
        let raw = self.resources.get(resource).raw;
        self.device.destroy_resource(raw);
        Ok(())
    }

    /// Destroys a depth stencil target.
    pub fn destroy_depth_stencil(&mut self, handle: Handle<DepthStencilTag>) -> RhiResult<()> {
        let entry = self.depth_stencils.get(handle);
        let (depth_view, resource) = (entry.depth_view, entry.resource);
        self.depth_allocator.free(depth_view)?;
        let raw = self.resources.get(resource).raw;
        self.device.destroy_resource(raw);
        Ok(())
    }

    /// Creates a graphics pipeline from pre-loaded shader bytecode.
    pub fn create_graphics_shader(
        &mut self,
        desc: &GraphicsShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<Handle<ShaderTag>> {
        let raw = self.device.create_graphics_pipeline(desc, name)?;
        debug!(name, "created graphics shader");
        Ok(self.shaders.push(raw))
    }

    /// Creates a compute pipeline from pre-loaded shader bytecode.
    pub fn create_compute_shader(
        &mut self,
        desc: &ComputeShaderDesc<'_>,
        name: &str,
    ) -> RhiResult<Handle<ShaderTag>> {
        let raw = self.device.create_compute_pipeline(desc, name)?;
        debug!(name, "created compute shader");
        Ok(self.shaders.push(raw))
    }

    // Buffer access

    /// Maps a staging or readback buffer for CPU access.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NotMappable`] for device-local buffers.
    pub fn map_buffer(&mut self, handle: Handle<BufferTag>) -> RhiResult<*mut u8> {
        let entry = self.buffers.get(handle);
        if !entry.kind.mappable() {
            return Err(RhiError::NotMappable(entry.kind));
        }
        let raw = self.resources.get(entry.resource).raw;
        self.device.map(raw)
    }

    /// Unmaps a previously mapped buffer.
    pub fn unmap_buffer(&mut self, handle: Handle<BufferTag>) {
        let raw = self.resources.get(self.buffers.get(handle).resource).raw;
        self.device.unmap(raw);
    }

    /// Byte size of a buffer.
    #[inline]
    pub fn buffer_size(&self, handle: Handle<BufferTag>) -> u64 {
        self.buffers.get(handle).size
    }

    /// Shader-visible slot index of a buffer's view. Shaders index the
    /// global descriptor array with this value.
    #[inline]
    pub fn buffer_gpu_index(&self, handle: Handle<BufferTag>) -> u32 {
        self.view_allocator.slot_of(self.buffers.get(handle).view)
    }

    /// Shader-visible slot index of a texture's view.
    #[inline]
    pub fn texture_gpu_index(&self, handle: Handle<TextureTag>) -> u32 {
        self.view_allocator.slot_of(self.textures.get(handle).view)
    }

    /// Shader-visible slot index of a render target's texture view.
    #[inline]
    pub fn render_target_gpu_index(&self, handle: Handle<RenderTargetTag>) -> u32 {
        self.view_allocator
            .slot_of(self.render_targets.get(handle).texture_view)
    }

    // Command lifecycle

    /// Creates a command list for `queue`.
    pub fn create_command(
        &mut self,
        queue: QueueKind,
        name: &str,
    ) -> RhiResult<Handle<CommandTag>> {
        let raw = self.device.create_command(queue, name)?;
        Ok(self.commands.push(CommandEntry {
            raw,
            queue,
            state: CommandState::Idle,
            name: name.to_owned(),
        }))
    }

    fn expect_state(
        &self,
        handle: Handle<CommandTag>,
        expected: CommandState,
    ) -> RhiResult<RawCommand> {
        let entry = self.commands.get(handle);
        if entry.state != expected {
            return Err(RhiError::CommandState {
                name: entry.name.clone(),
                expected,
                actual: entry.state,
            });
        }
        Ok(entry.raw)
    }

    fn recording(&self, handle: Handle<CommandTag>) -> RhiResult<RawCommand> {
        self.expect_state(handle, CommandState::Recording)
    }

    /// Opens a command list for recording.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::CommandState`] if the list is already recording.
    pub fn begin_command(&mut self, handle: Handle<CommandTag>) -> RhiResult<()> {
        let entry = self.commands.get(handle);
        if entry.state == CommandState::Recording {
            return Err(RhiError::CommandState {
                name: entry.name.clone(),
                expected: CommandState::Idle,
                actual: entry.state,
            });
        }
        let raw = entry.raw;
        self.device.reset_command(raw)?;
        self.commands.get_mut(handle).state = CommandState::Recording;
        Ok(())
    }

    /// Closes a command list for submission. On the graphics queue the
    /// current backbuffer is transitioned to `Present` first so a frame
    /// command can be submitted and presented without further barriers.
    pub fn end_command(&mut self, handle: Handle<CommandTag>) -> RhiResult<()> {
        if self.commands.get(handle).queue == QueueKind::Graphics {
            let backbuffer = self
                .render_targets
                .get(self.frame_data().render_target)
                .resource;
            self.transition(handle, backbuffer, ResourceState::Present)?;
        }
        let raw = self.recording(handle)?;
        self.device.close_command(raw)?;
        self.commands.get_mut(handle).state = CommandState::Closed;
        Ok(())
    }

    /// Binds the global root layout and shader-visible descriptor heap.
    /// Call once after [`RenderContext::begin_command`] on graphics lists.
    pub fn setup_graphics_command(&mut self, handle: Handle<CommandTag>) -> RhiResult<()> {
        let raw = self.recording(handle)?;
        self.device.bind_globals(raw);
        Ok(())
    }

    /// Submits closed command lists to `queue`. The lists return to the
    /// idle state and may be re-begun afterwards.
    pub fn submit(&mut self, handles: &[Handle<CommandTag>], queue: QueueKind) -> RhiResult<()> {
        let mut raw = Vec::with_capacity(handles.len());
        for &handle in handles {
            raw.push(self.expect_state(handle, CommandState::Closed)?);
        }
        self.device.submit(queue, &raw)?;
        for &handle in handles {
            self.commands.get_mut(handle).state = CommandState::Idle;
        }
        Ok(())
    }

    /// Submits closed command lists and blocks until the queue has executed
    /// them. Used for uploads outside the frame loop.
    pub fn one_time_submit(
        &mut self,
        handles: &[Handle<CommandTag>],
        queue: QueueKind,
    ) -> RhiResult<()> {
        self.submit(handles, queue)?;
        let value = self.bump_fence(queue);
        self.device.signal(queue, value)?;
        self.device.wait(queue, value)?;
        Ok(())
    }

    fn bump_fence(&mut self, queue: QueueKind) -> u64 {
        let counter = match queue {
            QueueKind::Graphics => &mut self.graphics_fence,
            QueueKind::Transfer => &mut self.transfer_fence,
        };
        *counter += 1;
        *counter
    }

    // Recording

    /// Records a state transition for a resource, eliding it when the
    /// resource is already in `target` state.
    pub fn transition(
        &mut self,
        cmd: Handle<CommandTag>,
        resource: Handle<ResourceTag>,
        target: ResourceState,
    ) -> RhiResult<()> {
        let raw_cmd = self.recording(cmd)?;
        let entry = self.resources.get_mut(resource);
        if let Some(t) = plan_transition(entry.state, target) {
            entry.state = t.to;
            let raw = entry.raw;
            self.device.cmd_barrier(raw_cmd, raw, t.from, t.to);
        }
        Ok(())
    }

    /// Begins a render pass over up to [`MAX_RENDER_TARGETS`] color targets
    /// and an optional depth target. Attachment resources are transitioned
    /// into their attachment states first.
    pub fn begin_render_pass(
        &mut self,
        cmd: Handle<CommandTag>,
        desc: &RenderPassDesc,
    ) -> RhiResult<()> {
        if desc.colors.len() > MAX_RENDER_TARGETS {
            return Err(RhiError::TooManyRenderTargets(
                desc.colors.len(),
                MAX_RENDER_TARGETS,
            ));
        }
        let raw_cmd = self.recording(cmd)?;

        let mut extent = self.size;
        let mut colors = Vec::with_capacity(desc.colors.len());
        for ColorAttachment {
            target,
            load,
            store,
            clear,
        } in desc.colors.iter().copied()
        {
            let entry = self.render_targets.get(target);
            let (resource, render_view, size) = (entry.resource, entry.render_view, entry.size);
            extent = size;
            self.transition(cmd, resource, ResourceState::RenderTarget)?;
            colors.push(PassColor {
                view_slot: self.render_allocator.slot_of(render_view),
                load,
                store,
                clear,
            });
        }

        let depth = match desc.depth {
            Some(d) => {
                let entry = self.depth_stencils.get(d.target);
                let (resource, depth_view) = (entry.resource, entry.depth_view);
                self.transition(cmd, resource, ResourceState::DepthWrite)?;
                Some(PassDepth {
                    view_slot: self.depth_allocator.slot_of(depth_view),
                    load: d.load,
                    store: d.store,
                    clear_depth: d.clear_depth,
                })
            }
            None => None,
        };

        self.device.cmd_begin_pass(
            raw_cmd,
            &PassDesc {
                colors,
                depth,
                extent,
            },
        );
        Ok(())
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&mut self, cmd: Handle<CommandTag>) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_end_pass(raw);
        Ok(())
    }

    /// Binds a pipeline.
    pub fn bind_shader(
        &mut self,
        cmd: Handle<CommandTag>,
        shader: Handle<ShaderTag>,
    ) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        let pipeline = *self.shaders.get(shader);
        self.device.cmd_bind_pipeline(raw, pipeline);
        Ok(())
    }

    pub fn set_viewport(&mut self, cmd: Handle<CommandTag>, viewport: Viewport) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_set_viewport(raw, viewport);
        Ok(())
    }

    pub fn set_scissor(&mut self, cmd: Handle<CommandTag>, scissor: Scissor) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_set_scissor(raw, scissor);
        Ok(())
    }

    pub fn set_topology(
        &mut self,
        cmd: Handle<CommandTag>,
        topology: PrimitiveTopology,
    ) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_set_topology(raw, topology);
        Ok(())
    }

    /// Pushes up to [`MAX_PUSH_CONSTANT_DWORDS`] 32-bit constants. Shaders
    /// receive descriptor slot indices this way.
    pub fn push_constants(&mut self, cmd: Handle<CommandTag>, data: &[u32]) -> RhiResult<()> {
        if data.len() > MAX_PUSH_CONSTANT_DWORDS {
            return Err(RhiError::PushConstantOverflow(
                data.len(),
                MAX_PUSH_CONSTANT_DWORDS,
            ));
        }
        let raw = self.recording(cmd)?;
        self.device.cmd_push_constants(raw, data);
        Ok(())
    }

    pub fn draw(
        &mut self,
        cmd: Handle<CommandTag>,
        vertex_count: u32,
        instance_count: u32,
    ) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_draw(raw, vertex_count, instance_count, 0, 0);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        cmd: Handle<CommandTag>,
        index_count: u32,
        instance_count: u32,
    ) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device
            .cmd_draw_indexed(raw, index_count, instance_count, 0, 0, 0);
        Ok(())
    }

    pub fn dispatch(&mut self, cmd: Handle<CommandTag>, x: u32, y: u32, z: u32) -> RhiResult<()> {
        let raw = self.recording(cmd)?;
        self.device.cmd_dispatch(raw, x, y, z);
        Ok(())
    }

    /// Records a buffer-to-buffer copy, transitioning both sides into copy
    /// states first.
    pub fn copy_buffer(
        &mut self,
        cmd: Handle<CommandTag>,
        src: Handle<BufferTag>,
        src_offset: u64,
        dst: Handle<BufferTag>,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        let src_resource = self.buffers.get(src).resource;
        let dst_resource = self.buffers.get(dst).resource;
        self.transition(cmd, src_resource, ResourceState::CopySrc)?;
        self.transition(cmd, dst_resource, ResourceState::CopyDst)?;
        let raw_cmd = self.recording(cmd)?;
        let raw_src = self.resources.get(src_resource).raw;
        let raw_dst = self.resources.get(dst_resource).raw;
        self.device
            .cmd_copy_buffer(raw_cmd, raw_src, src_offset, raw_dst, dst_offset, size);
        Ok(())
    }

    /// Copies a render target into the current backbuffer.
    pub fn blit_to_swapchain(
        &mut self,
        cmd: Handle<CommandTag>,
        source: Handle<RenderTargetTag>,
    ) -> RhiResult<()> {
        let src_resource = self.render_targets.get(source).resource;
        let dst_resource = self
            .render_targets
            .get(self.frame_data().render_target)
            .resource;
        self.transition(cmd, src_resource, ResourceState::CopySrc)?;
        self.transition(cmd, dst_resource, ResourceState::CopyDst)?;
        let raw_cmd = self.recording(cmd)?;
        let raw_src = self.resources.get(src_resource).raw;
        let raw_dst = self.resources.get(dst_resource).raw;
        self.device.cmd_copy_resource(raw_cmd, raw_src, raw_dst);
        Ok(())
    }

    // Frame pacing

    /// Presents the current backbuffer and paces the CPU to at most
    /// [`crate::types::FRAME_COUNT`] frames in flight.
    pub fn present(&mut self) -> RhiResult<()> {
        self.device.present()?;
        self.wait_for_frame()
    }

    /// Signals the end of the current frame's GPU work, switches to the
    /// backbuffer the device reports next, and blocks until that frame's
    /// previous work has finished.
    pub fn wait_for_frame(&mut self) -> RhiResult<()> {
        let value = self.bump_fence(QueueKind::Graphics);
        self.device.signal(QueueKind::Graphics, value)?;
        self.frames[self.frame_index].fence_value = value;

        self.frame_index = self.device.current_backbuffer_index() as usize;
        let pending = self.frames[self.frame_index].fence_value;
        if self.device.completed_value(QueueKind::Graphics) < pending {
            self.device.wait(QueueKind::Graphics, pending)?;
        }
        Ok(())
    }

    /// Blocks until the graphics queue has drained completely.
    pub fn wait_for_gpu(&mut self) -> RhiResult<()> {
        let value = self.bump_fence(QueueKind::Graphics);
        self.device.signal(QueueKind::Graphics, value)?;
        self.device.wait(QueueKind::Graphics, value)?;
        Ok(())
    }

    /// Recreates the swapchain at `size`.
    ///
    /// Drains the GPU, destroys the per-frame backbuffer targets, resizes
    /// the device swapchain, then rebuilds fresh targets and resets the
    /// frame index to whatever backbuffer the device reports current.
    pub fn resize(&mut self, size: UVec2) -> RhiResult<()> {
        info!(width = size.x, height = size.y, "resizing swapchain");
        self.wait_for_gpu()?;

        let frames = std::mem::take(&mut self.frames);
        for frame in &frames {
            self.destroy_render_target(frame.render_target)?;
        }
        self.size = size;
        self.device.resize_swapchain(size)?;

        for (i, frame) in frames.iter().enumerate() {
            let backbuffer = self.device.swapchain_resource(i as u32)?;
            let resource = self.resources.push(ResourceEntry {
                raw: backbuffer,
                state: ResourceState::Common,
            });
            let render_target = self.create_render_target(&RenderTargetDesc {
                size,
                format: BACKBUFFER_FORMAT,
                resource,
            })?;
            self.frames.push(FrameData {
                command: frame.command,
                render_target,
                fence_value: 0,
            });
        }
        self.frame_index = self.device.current_backbuffer_index() as usize;
        Ok(())
    }
}
