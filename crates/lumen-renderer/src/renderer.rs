//! Frame orchestration on top of the render context.
//!
//! Owns the context and a pass list, uploads the demo geometry once at
//! startup, and records one frame per [`Renderer::render_frame`] call.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use lumen_core::{Error, Result};
use lumen_rhi::context::BACKBUFFER_FORMAT;
use lumen_rhi::device::GpuDevice;
use lumen_rhi::handle::{BufferTag, CommandTag, Handle, ShaderTag};
use lumen_rhi::types::{
    BufferDesc, BufferKind, ColorAttachment, ContextConfig, GraphicsShaderDesc, LoadOp,
    PrimitiveTopology, QueueKind, RenderPassDesc, Scissor, StoreOp, Viewport,
};
use lumen_rhi::{RenderContext, RhiError};
use tracing::info;

use crate::pass::{FrameInfo, PassList};

/// Clear color for the backbuffer pass.
pub const CLEAR_COLOR: [f32; 4] = [0.392, 0.584, 0.929, 1.0];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

/// SPIR-V blobs for the demo pipeline, loaded by the caller.
pub struct ShaderBlobs<'a> {
    pub vertex: &'a [u8],
    pub fragment: &'a [u8],
}

/// Records and submits frames against a [`RenderContext`].
pub struct Renderer<D: GpuDevice> {
    ctx: RenderContext<D>,
    passes: PassList<D>,
    frame_number: u64,
    elapsed_secs: f32,
}

impl<D: GpuDevice> Renderer<D> {
    /// Builds the context, uploads the triangle and registers the demo
    /// pass.
    pub fn new(
        device: D,
        config: ContextConfig,
        size: UVec2,
        shaders: &ShaderBlobs<'_>,
    ) -> Result<Self> {
        let ctx = RenderContext::new(device, config, size).map_err(gpu)?;
        let mut renderer = Self {
            ctx,
            passes: PassList::new(),
            frame_number: 0,
            elapsed_secs: 0.0,
        };

        let vertex_buffer = renderer.upload_triangle()?;
        let shader = renderer.create_pipeline(shaders)?;
        renderer.add_scene_pass(vertex_buffer, shader);

        info!("renderer ready");
        Ok(renderer)
    }

    /// Uploads the triangle vertices through a staging buffer and a
    /// one-shot transfer command.
    fn upload_triangle(&mut self) -> Result<Handle<BufferTag>> {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let stride = std::mem::size_of::<Vertex>() as u64;

        let staging = self
            .ctx
            .create_buffer(
                &BufferDesc {
                    kind: BufferKind::Staging,
                    first_element: 0,
                    element_count: TRIANGLE.len() as u64,
                    stride,
                    resource: Handle::NULL,
                },
                "triangle staging",
            )
            .map_err(gpu)?;
        let vertex_buffer = self
            .ctx
            .create_buffer(
                &BufferDesc {
                    kind: BufferKind::Storage,
                    first_element: 0,
                    element_count: TRIANGLE.len() as u64,
                    stride,
                    resource: Handle::NULL,
                },
                "triangle vertices",
            )
            .map_err(gpu)?;

        let mapped = self.ctx.map_buffer(staging).map_err(gpu)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped, bytes.len());
        }
        self.ctx.unmap_buffer(staging);

        let upload = self
            .ctx
            .create_command(QueueKind::Transfer, "triangle upload")
            .map_err(gpu)?;
        self.ctx.begin_command(upload).map_err(gpu)?;
        self.ctx
            .copy_buffer(upload, staging, 0, vertex_buffer, 0, bytes.len() as u64)
            .map_err(gpu)?;
        self.ctx.end_command(upload).map_err(gpu)?;
        self.ctx
            .one_time_submit(&[upload], QueueKind::Transfer)
            .map_err(gpu)?;

        Ok(vertex_buffer)
    }

    fn create_pipeline(&mut self, shaders: &ShaderBlobs<'_>) -> Result<Handle<ShaderTag>> {
        self.ctx
            .create_graphics_shader(
                &GraphicsShaderDesc {
                    vertex_code: shaders.vertex,
                    fragment_code: shaders.fragment,
                    color_formats: &[BACKBUFFER_FORMAT],
                    depth_format: None,
                    topology: PrimitiveTopology::TriangleList,
                },
                "triangle pipeline",
            )
            .map_err(|e| Error::Shader(e.to_string()))
    }

    /// Registers the pass that clears the backbuffer and draws the
    /// triangle, pulling vertices through the bindless buffer index.
    fn add_scene_pass(&mut self, vertex_buffer: Handle<BufferTag>, shader: Handle<ShaderTag>) {
        self.passes.add("scene", move |ctx, cmd, info| {
            let target = ctx.frame_data().render_target;
            ctx.begin_render_pass(
                cmd,
                &RenderPassDesc {
                    colors: vec![ColorAttachment {
                        target,
                        load: LoadOp::Clear,
                        store: StoreOp::Store,
                        clear: CLEAR_COLOR,
                    }],
                    depth: None,
                },
            )?;
            ctx.bind_shader(cmd, shader)?;
            ctx.set_viewport(cmd, Viewport::sized(info.size))?;
            ctx.set_scissor(cmd, Scissor::sized(info.size))?;
            ctx.set_topology(cmd, PrimitiveTopology::TriangleList)?;
            let vertex_index = ctx.buffer_gpu_index(vertex_buffer);
            ctx.push_constants(cmd, &[vertex_index])?;
            ctx.draw(cmd, 3, 1)?;
            ctx.end_render_pass(cmd)
        });
    }

    /// Adds a caller-defined pass after the built-in ones.
    pub fn add_pass<F>(&mut self, name: &'static str, record: F)
    where
        F: FnMut(&mut RenderContext<D>, Handle<CommandTag>, &FrameInfo) -> lumen_rhi::RhiResult<()>
            + 'static,
    {
        self.passes.add(name, record);
    }

    /// Records, submits and presents one frame.
    pub fn render_frame(&mut self, delta_secs: f32) -> Result<()> {
        self.elapsed_secs += delta_secs;
        let frame = self.ctx.frame_data();
        let info = FrameInfo {
            frame_index: self.ctx.frame_index(),
            size: self.ctx.size(),
            delta_secs,
            elapsed_secs: self.elapsed_secs,
        };

        self.ctx.begin_command(frame.command).map_err(gpu)?;
        self.ctx.setup_graphics_command(frame.command).map_err(gpu)?;
        self.passes
            .run(&mut self.ctx, frame.command, &info)
            .map_err(gpu)?;
        self.ctx.end_command(frame.command).map_err(gpu)?;
        self.ctx
            .submit(&[frame.command], QueueKind::Graphics)
            .map_err(gpu)?;
        self.ctx.present().map_err(gpu)?;

        self.frame_number += 1;
        Ok(())
    }

    /// Waits for the GPU and rebuilds the swapchain targets at `size`.
    pub fn resize(&mut self, size: UVec2) -> Result<()> {
        self.ctx.resize(size).map_err(gpu)
    }

    /// Number of frames submitted so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn context(&self) -> &RenderContext<D> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext<D> {
        &mut self.ctx
    }
}

fn gpu(e: RhiError) -> Error {
    Error::Gpu(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_rhi::null::NullDevice;
    use lumen_rhi::types::FRAME_COUNT;

    const SIZE: UVec2 = UVec2::new(640, 480);

    fn blobs() -> ShaderBlobs<'static> {
        ShaderBlobs {
            vertex: &[0u8; 8],
            fragment: &[0u8; 8],
        }
    }

    fn small_config() -> ContextConfig {
        ContextConfig {
            buffer_heap_size: 1 << 16,
            texture_heap_size: 1 << 24,
            upload_heap_size: 1 << 16,
            readback_heap_size: 1 << 16,
            view_descriptor_count: 64,
            render_descriptor_count: 16,
            depth_descriptor_count: 4,
        }
    }

    fn renderer() -> Renderer<NullDevice> {
        Renderer::new(NullDevice::new(SIZE), small_config(), SIZE, &blobs()).unwrap()
    }

    #[test]
    fn startup_uploads_the_triangle_once() {
        let r = renderer();
        assert_eq!(r.context().device().submit_count(QueueKind::Transfer), 1);
        assert_eq!(r.context().fence_value(QueueKind::Transfer), 1);
    }

    #[test]
    fn render_frame_submits_and_presents() {
        let mut r = renderer();
        r.render_frame(0.016).unwrap();
        assert_eq!(r.frame_number(), 1);
        assert_eq!(r.context().device().present_count(), 1);
        assert_eq!(r.context().frame_index(), 1 % FRAME_COUNT);
    }

    #[test]
    fn resize_then_render_keeps_going() {
        let mut r = renderer();
        r.render_frame(0.016).unwrap();
        r.resize(UVec2::new(800, 600)).unwrap();
        assert_eq!(r.context().size(), UVec2::new(800, 600));
        r.render_frame(0.016).unwrap();
        assert_eq!(r.frame_number(), 2);
    }

    #[test]
    fn extra_passes_run_in_order() {
        let mut r = renderer();
        r.add_pass("post", |ctx, cmd, _info| {
            ctx.set_topology(cmd, PrimitiveTopology::TriangleList)
        });
        r.render_frame(0.016).unwrap();
        assert_eq!(r.context().device().present_count(), 1);
    }
}
