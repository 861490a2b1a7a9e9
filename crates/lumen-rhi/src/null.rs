//! Headless software device for tests.
//!
//! `NullDevice` implements [`GpuDevice`] without touching a GPU: heaps are
//! plain byte arrays, command lists record their operations into a vec, and
//! submission executes copies immediately. Fences complete as soon as they
//! are signaled unless a completion lag is configured, in which case
//! completion trails the signaled value until someone blocks on it. Tests
//! drive the full context against it and then inspect what was recorded.

use glam::UVec2;

use crate::descriptor::DescriptorHeapInfo;
use crate::device::{
    AllocationInfo, GpuDevice, PassDesc, RawCommand, RawHeap, RawPipeline, RawResource, ViewClass,
};
use crate::error::{RhiError, RhiResult};
use crate::types::{
    ComputeShaderDesc, Format, GraphicsShaderDesc, HeapKind, PrimitiveTopology, QueueKind,
    ResourceState, Scissor, TextureDesc, Viewport,
};

/// One recorded command list operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Barrier {
        resource: RawResource,
        from: ResourceState,
        to: ResourceState,
    },
    BeginPass {
        colors: usize,
        has_depth: bool,
        clear: Option<[f32; 4]>,
    },
    EndPass,
    BindPipeline(RawPipeline),
    BindGlobals,
    SetViewport,
    SetScissor,
    SetTopology(PrimitiveTopology),
    PushConstants(usize),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: RawResource,
        src_offset: u64,
        dst: RawResource,
        dst_offset: u64,
        size: u64,
    },
    CopyResource {
        src: RawResource,
        dst: RawResource,
    },
}

enum NullResource {
    Buffer { heap: usize, offset: u64, size: u64 },
    Texture { size: UVec2 },
    Backbuffer { image: u32, generation: u32 },
}

struct NullCommand {
    queue: QueueKind,
    ops: Vec<Op>,
}

/// Software [`GpuDevice`] with no GPU behind it.
pub struct NullDevice {
    size: UVec2,
    frame_count: usize,
    backbuffer_index: u32,
    swapchain_generation: u32,
    heaps: Vec<Box<[u8]>>,
    resources: Vec<Option<NullResource>>,
    commands: Vec<NullCommand>,
    pipelines: usize,
    completed: [u64; 2],
    signaled: [u64; 2],
    /// How far completion trails the signaled value. Zero completes
    /// signals immediately.
    fence_lag: u64,
    submits: [usize; 2],
    waits: [usize; 2],
    presents: usize,
}

fn queue_slot(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Graphics => 0,
        QueueKind::Transfer => 1,
    }
}

impl NullDevice {
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            frame_count: crate::types::FRAME_COUNT,
            backbuffer_index: 0,
            swapchain_generation: 0,
            heaps: Vec::new(),
            resources: Vec::new(),
            commands: Vec::new(),
            pipelines: 0,
            completed: [0; 2],
            signaled: [0; 2],
            fence_lag: 0,
            submits: [0; 2],
            waits: [0; 2],
            presents: 0,
        }
    }

    /// A device whose fence completion trails the signaled value by `lag`,
    /// modeling a GPU that is `lag` submissions behind the CPU. Blocking
    /// waits catch completion up, as a real fence wait would.
    pub fn with_fence_lag(size: UVec2, lag: u64) -> Self {
        let mut device = Self::new(size);
        device.fence_lag = lag;
        device
    }

    fn push_resource(&mut self, resource: NullResource) -> RawResource {
        let id = self.resources.len() as u64;
        self.resources.push(Some(resource));
        RawResource(id)
    }

    fn buffer_location(&self, resource: RawResource) -> (usize, u64, u64) {
        match self.resources[resource.0 as usize] {
            Some(NullResource::Buffer { heap, offset, size }) => (heap, offset, size),
            _ => panic!("resource {resource:?} is not a buffer"),
        }
    }

    fn record(&mut self, cmd: RawCommand, op: Op) {
        self.commands[cmd.0 as usize].ops.push(op);
    }

    fn execute(&mut self, cmd: RawCommand) {
        let ops = self.commands[cmd.0 as usize].ops.clone();
        for op in ops {
            if let Op::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } = op
            {
                let (src_heap, src_base, _) = self.buffer_location(src);
                let (dst_heap, dst_base, _) = self.buffer_location(dst);
                let range = (src_base + src_offset) as usize..(src_base + src_offset + size) as usize;
                let bytes: Vec<u8> = self.heaps[src_heap][range].to_vec();
                let dst_start = (dst_base + dst_offset) as usize;
                self.heaps[dst_heap][dst_start..dst_start + size as usize]
                    .copy_from_slice(&bytes);
            }
        }
    }

    // Test introspection

    /// Operations recorded on a command list since its last reset.
    pub fn recorded_ops(&self, cmd: RawCommand) -> &[Op] {
        &self.commands[cmd.0 as usize].ops
    }

    /// Number of barriers recorded on a command list since its last reset.
    pub fn barrier_count(&self, cmd: RawCommand) -> usize {
        self.recorded_ops(cmd)
            .iter()
            .filter(|op| matches!(op, Op::Barrier { .. }))
            .count()
    }

    /// Number of submissions made to a queue.
    pub fn submit_count(&self, queue: QueueKind) -> usize {
        self.submits[queue_slot(queue)]
    }

    /// Number of presents performed.
    pub fn present_count(&self) -> usize {
        self.presents
    }

    /// Number of waits on a queue that actually had to block.
    pub fn blocking_wait_count(&self, queue: QueueKind) -> usize {
        self.waits[queue_slot(queue)]
    }

    /// Swapchain image index and swapchain generation of a backbuffer.
    pub fn backbuffer_info(&self, resource: RawResource) -> (u32, u32) {
        match self.resources[resource.0 as usize] {
            Some(NullResource::Backbuffer { image, generation }) => (image, generation),
            _ => panic!("resource {resource:?} is not a backbuffer"),
        }
    }

    /// Raw bytes of one heap, for asserting copy results.
    pub fn heap_bytes(&self, heap: RawHeap, offset: u64, len: u64) -> &[u8] {
        &self.heaps[heap.0 as usize][offset as usize..(offset + len) as usize]
    }
}

impl GpuDevice for NullDevice {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.backbuffer_index
    }

    fn descriptor_heap_info(&self, class: ViewClass) -> DescriptorHeapInfo {
        // Synthetic addresses, distinct per class so mixups are visible.
        let (cpu_base, gpu_base) = match class {
            ViewClass::ShaderVisible => (0x1_0000, 0x10_0000),
            ViewClass::RenderTarget => (0x2_0000, 0x2_0000),
            ViewClass::DepthStencil => (0x3_0000, 0x3_0000),
        };
        DescriptorHeapInfo {
            cpu_base,
            gpu_base,
            stride: 32,
            capacity: 1 << 20,
        }
    }

    fn create_heap(&mut self, _kind: HeapKind, size: u64, _name: &str) -> RhiResult<RawHeap> {
        let id = self.heaps.len() as u64;
        self.heaps.push(vec![0u8; size as usize].into_boxed_slice());
        Ok(RawHeap(id))
    }

    fn buffer_allocation_info(&self, size: u64) -> AllocationInfo {
        AllocationInfo {
            size,
            alignment: 256,
        }
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> AllocationInfo {
        let size = desc.size.x as u64 * desc.size.y as u64 * desc.format.texel_size();
        AllocationInfo {
            size,
            alignment: 4096,
        }
    }

    fn create_buffer(
        &mut self,
        heap: RawHeap,
        offset: u64,
        size: u64,
        _name: &str,
    ) -> RhiResult<RawResource> {
        Ok(self.push_resource(NullResource::Buffer {
            heap: heap.0 as usize,
            offset,
            size,
        }))
    }

    fn create_texture(
        &mut self,
        _heap: RawHeap,
        _offset: u64,
        desc: &TextureDesc,
        _name: &str,
    ) -> RhiResult<RawResource> {
        Ok(self.push_resource(NullResource::Texture { size: desc.size }))
    }

    fn swapchain_resource(&mut self, index: u32) -> RhiResult<RawResource> {
        let generation = self.swapchain_generation;
        Ok(self.push_resource(NullResource::Backbuffer {
            image: index,
            generation,
        }))
    }

    fn destroy_resource(&mut self, resource: RawResource) {
        self.resources[resource.0 as usize] = None;
    }

    fn map(&mut self, resource: RawResource) -> RhiResult<*mut u8> {
        let (heap, offset, _) = self.buffer_location(resource);
        Ok(unsafe { self.heaps[heap].as_mut_ptr().add(offset as usize) })
    }

    fn unmap(&mut self, _resource: RawResource) {}

    fn create_buffer_view(
        &mut self,
        _resource: RawResource,
        _offset: u64,
        _size: u64,
        _slot: u32,
    ) -> RhiResult<()> {
        Ok(())
    }

    fn create_texture_view(
        &mut self,
        _resource: RawResource,
        _format: Format,
        _slot: u32,
    ) -> RhiResult<()> {
        Ok(())
    }

    fn create_render_target_view(
        &mut self,
        _resource: RawResource,
        _format: Format,
        _slot: u32,
    ) -> RhiResult<()> {
        Ok(())
    }

    fn create_depth_stencil_view(
        &mut self,
        _resource: RawResource,
        _format: Format,
        _slot: u32,
    ) -> RhiResult<()> {
        Ok(())
    }

    fn create_graphics_pipeline(
        &mut self,
        _desc: &GraphicsShaderDesc<'_>,
        _name: &str,
    ) -> RhiResult<RawPipeline> {
        let id = self.pipelines as u64;
        self.pipelines += 1;
        Ok(RawPipeline(id))
    }

    fn create_compute_pipeline(
        &mut self,
        _desc: &ComputeShaderDesc<'_>,
        _name: &str,
    ) -> RhiResult<RawPipeline> {
        let id = self.pipelines as u64;
        self.pipelines += 1;
        Ok(RawPipeline(id))
    }

    fn create_command(&mut self, queue: QueueKind, _name: &str) -> RhiResult<RawCommand> {
        let id = self.commands.len() as u64;
        self.commands.push(NullCommand {
            queue,
            ops: Vec::new(),
        });
        Ok(RawCommand(id))
    }

    fn reset_command(&mut self, cmd: RawCommand) -> RhiResult<()> {
        self.commands[cmd.0 as usize].ops.clear();
        Ok(())
    }

    fn close_command(&mut self, _cmd: RawCommand) -> RhiResult<()> {
        Ok(())
    }

    fn bind_globals(&mut self, cmd: RawCommand) {
        self.record(cmd, Op::BindGlobals);
    }

    fn cmd_barrier(
        &mut self,
        cmd: RawCommand,
        resource: RawResource,
        from: ResourceState,
        to: ResourceState,
    ) {
        self.record(cmd, Op::Barrier { resource, from, to });
    }

    fn cmd_begin_pass(&mut self, cmd: RawCommand, pass: &PassDesc) {
        let clear = pass
            .colors
            .first()
            .filter(|c| c.load == crate::types::LoadOp::Clear)
            .map(|c| c.clear);
        self.record(
            cmd,
            Op::BeginPass {
                colors: pass.colors.len(),
                has_depth: pass.depth.is_some(),
                clear,
            },
        );
    }

    fn cmd_end_pass(&mut self, cmd: RawCommand) {
        self.record(cmd, Op::EndPass);
    }

    fn cmd_bind_pipeline(&mut self, cmd: RawCommand, pipeline: RawPipeline) {
        self.record(cmd, Op::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&mut self, cmd: RawCommand, _viewport: Viewport) {
        self.record(cmd, Op::SetViewport);
    }

    fn cmd_set_scissor(&mut self, cmd: RawCommand, _scissor: Scissor) {
        self.record(cmd, Op::SetScissor);
    }

    fn cmd_set_topology(&mut self, cmd: RawCommand, topology: PrimitiveTopology) {
        self.record(cmd, Op::SetTopology(topology));
    }

    fn cmd_push_constants(&mut self, cmd: RawCommand, data: &[u32]) {
        self.record(cmd, Op::PushConstants(data.len()));
    }

    fn cmd_draw(
        &mut self,
        cmd: RawCommand,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            cmd,
            Op::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: RawCommand,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(
            cmd,
            Op::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&mut self, cmd: RawCommand, x: u32, y: u32, z: u32) {
        self.record(cmd, Op::Dispatch { x, y, z });
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
        self.record(
            cmd,
            Op::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            },
        );
    }

    fn cmd_copy_resource(&mut self, cmd: RawCommand, src: RawResource, dst: RawResource) {
        self.record(cmd, Op::CopyResource { src, dst });
    }

    fn submit(&mut self, queue: QueueKind, commands: &[RawCommand]) -> RhiResult<()> {
        for &cmd in commands {
            debug_assert_eq!(self.commands[cmd.0 as usize].queue, queue);
            self.execute(cmd);
        }
        self.submits[queue_slot(queue)] += 1;
        Ok(())
    }

    fn signal(&mut self, queue: QueueKind, value: u64) -> RhiResult<()> {
        let slot = queue_slot(queue);
        self.signaled[slot] = self.signaled[slot].max(value);
        // Completion trails the signal by the configured lag.
        let ready = self.signaled[slot].saturating_sub(self.fence_lag);
        self.completed[slot] = self.completed[slot].max(ready);
        Ok(())
    }

    fn completed_value(&self, queue: QueueKind) -> u64 {
        self.completed[queue_slot(queue)]
    }

    fn wait(&mut self, queue: QueueKind, value: u64) -> RhiResult<()> {
        let slot = queue_slot(queue);
        // Waiting on a value nothing will ever signal would block forever.
        if value > self.signaled[slot] {
            return Err(RhiError::SwapchainError(format!(
                "wait for unsignaled fence value {value}"
            )));
        }
        if value > self.completed[slot] {
            self.waits[slot] += 1;
            self.completed[slot] = value;
        }
        Ok(())
    }

    fn present(&mut self) -> RhiResult<()> {
        self.presents += 1;
        self.backbuffer_index = (self.backbuffer_index + 1) % self.frame_count as u32;
        Ok(())
    }

    fn resize_swapchain(&mut self, size: UVec2) -> RhiResult<()> {
        self.size = size;
        self.swapchain_generation += 1;
        self.backbuffer_index = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_buffer_moves_bytes_between_heaps() {
        let mut dev = NullDevice::new(UVec2::new(64, 64));
        let upload = dev.create_heap(HeapKind::Upload, 1024, "upload").unwrap();
        let local = dev.create_heap(HeapKind::Buffer, 1024, "buffer").unwrap();
        let src = dev.create_buffer(upload, 0, 16, "src").unwrap();
        let dst = dev.create_buffer(local, 256, 16, "dst").unwrap();

        let ptr = dev.map(src).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([7u8; 16].as_ptr(), ptr, 16) };
        dev.unmap(src);

        let cmd = dev.create_command(QueueKind::Transfer, "copy").unwrap();
        dev.cmd_copy_buffer(cmd, src, 0, dst, 0, 16);
        dev.submit(QueueKind::Transfer, &[cmd]).unwrap();

        assert_eq!(dev.heap_bytes(local, 256, 16), &[7u8; 16]);
        assert_eq!(dev.submit_count(QueueKind::Transfer), 1);
    }

    #[test]
    fn test_present_advances_backbuffer_round_robin() {
        let mut dev = NullDevice::new(UVec2::new(64, 64));
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(dev.current_backbuffer_index());
            dev.present().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_signals_complete_immediately() {
        let mut dev = NullDevice::new(UVec2::new(64, 64));
        dev.signal(QueueKind::Graphics, 5).unwrap();
        assert_eq!(dev.completed_value(QueueKind::Graphics), 5);
        dev.wait(QueueKind::Graphics, 5).unwrap();
        assert_eq!(dev.blocking_wait_count(QueueKind::Graphics), 0);
        assert!(dev.wait(QueueKind::Graphics, 6).is_err());
    }

    #[test]
    fn test_fence_lag_makes_waits_block() {
        let mut dev = NullDevice::with_fence_lag(UVec2::new(64, 64), 2);
        dev.signal(QueueKind::Graphics, 1).unwrap();
        dev.signal(QueueKind::Graphics, 2).unwrap();
        dev.signal(QueueKind::Graphics, 3).unwrap();
        // Completion trails by two.
        assert_eq!(dev.completed_value(QueueKind::Graphics), 1);
        dev.wait(QueueKind::Graphics, 3).unwrap();
        assert_eq!(dev.completed_value(QueueKind::Graphics), 3);
        assert_eq!(dev.blocking_wait_count(QueueKind::Graphics), 1);
        // A value never signaled still deadlocks.
        assert!(dev.wait(QueueKind::Graphics, 4).is_err());
    }

    #[test]
    fn test_resize_refreshes_backbuffer_generation() {
        let mut dev = NullDevice::new(UVec2::new(64, 64));
        let old = dev.swapchain_resource(0).unwrap();
        dev.resize_swapchain(UVec2::new(32, 32)).unwrap();
        let fresh = dev.swapchain_resource(0).unwrap();
        assert_eq!(dev.backbuffer_info(old).0, dev.backbuffer_info(fresh).0);
        assert_ne!(dev.backbuffer_info(old).1, dev.backbuffer_info(fresh).1);
    }
}
