//! Ordered list of render passes executed while recording a frame.

use glam::UVec2;
use lumen_rhi::device::GpuDevice;
use lumen_rhi::handle::{CommandTag, Handle};
use lumen_rhi::RenderContext;
use lumen_rhi::RhiResult;

/// Per-frame values handed to every pass callback.
pub struct FrameInfo {
    pub frame_index: usize,
    pub size: UVec2,
    pub delta_secs: f32,
    pub elapsed_secs: f32,
}

type PassFn<D> =
    Box<dyn FnMut(&mut RenderContext<D>, Handle<CommandTag>, &FrameInfo) -> RhiResult<()>>;

struct Pass<D: GpuDevice> {
    name: &'static str,
    record: PassFn<D>,
}

/// Named passes recorded in registration order into the frame command.
pub struct PassList<D: GpuDevice> {
    passes: Vec<Pass<D>>,
}

impl<D: GpuDevice> Default for PassList<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> PassList<D> {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add<F>(&mut self, name: &'static str, record: F)
    where
        F: FnMut(&mut RenderContext<D>, Handle<CommandTag>, &FrameInfo) -> RhiResult<()> + 'static,
    {
        self.passes.push(Pass {
            name,
            record: Box::new(record),
        });
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Records every pass into `cmd` in order. Stops at the first failure.
    pub fn run(
        &mut self,
        ctx: &mut RenderContext<D>,
        cmd: Handle<CommandTag>,
        info: &FrameInfo,
    ) -> RhiResult<()> {
        for pass in &mut self.passes {
            let _span = tracing::debug_span!("pass", name = pass.name).entered();
            (pass.record)(ctx, cmd, info)?;
        }
        Ok(())
    }
}
