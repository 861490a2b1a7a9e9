//! Shared value types for the render context.
//!
//! These are plain data descriptions; nothing in here owns a GPU object.

use glam::UVec2;

use crate::handle::{CommandTag, Handle, RenderTargetTag, ResourceTag};

/// Number of frames that may be in flight at once. Matches the swapchain
/// image count requested at startup.
pub const FRAME_COUNT: usize = 3;

/// Maximum number of simultaneous color targets in one render pass.
pub const MAX_RENDER_TARGETS: usize = 8;

/// Push constant budget in 32-bit values.
pub const MAX_PUSH_CONSTANT_DWORDS: usize = 32;

/// Texel formats understood by the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    R32Uint,
    D32Float,
}

impl Format {
    /// Bytes per texel.
    pub fn texel_size(self) -> u64 {
        match self {
            Format::Rgba8Unorm | Format::Bgra8Unorm => 4,
            Format::Rgba16Float => 8,
            Format::Rgba32Float => 16,
            Format::R32Float | Format::R32Uint => 4,
            Format::D32Float => 4,
        }
    }

    /// Returns true for depth formats.
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float)
    }
}

/// Which hardware queue a command list records for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

/// What a buffer is for. Decides which heap backs it and whether the CPU
/// can map it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local storage, shader accessible.
    Storage,
    /// Device-local constant data.
    Uniform,
    /// CPU-writable staging memory for uploads.
    Staging,
    /// CPU-readable memory for downloads.
    Readback,
}

impl BufferKind {
    /// Returns true if the CPU may map buffers of this kind.
    pub fn mappable(self) -> bool {
        matches!(self, BufferKind::Staging | BufferKind::Readback)
    }
}

/// The placement heaps a context pre-reserves at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapKind {
    /// Device-local buffer storage.
    Buffer,
    /// Device-local texture storage.
    Texture,
    /// Host-visible upload staging.
    Upload,
    /// Host-visible readback.
    Readback,
}

/// Logical access state of a resource, used to derive barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    RenderTarget,
    DepthWrite,
    ShaderResource,
    CopySrc,
    CopyDst,
    Present,
}

/// Recording state of a command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    /// Freshly created or submitted; must be begun before recording.
    Idle,
    /// Open for recording.
    Recording,
    /// Closed and ready for submission.
    Closed,
}

/// What happens to an attachment's contents when a pass begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

/// What happens to an attachment's contents when a pass ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Primitive assembly mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Viewport rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-size viewport with the default depth range.
    pub fn sized(size: UVec2) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: size.x as f32,
            height: size.y as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Scissor {
    /// Full-size scissor.
    pub fn sized(size: UVec2) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.x,
            height: size.y,
        }
    }
}

/// Description of a buffer to create.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub kind: BufferKind,
    /// First element visible through the shader view.
    pub first_element: u64,
    pub element_count: u64,
    /// Size of one element in bytes.
    pub stride: u64,
    /// Existing backing resource, or [`Handle::NULL`] to allocate one.
    pub resource: Handle<ResourceTag>,
}

impl BufferDesc {
    /// Total size in bytes covered by the view.
    pub fn size(&self) -> u64 {
        self.element_count * self.stride
    }
}

/// Description of a texture to create.
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc {
    pub size: UVec2,
    pub format: Format,
    pub mip_levels: u32,
    /// Allow use as a color target.
    pub render_target: bool,
    /// Existing backing resource, or [`Handle::NULL`] to allocate one.
    pub resource: Handle<ResourceTag>,
}

/// Description of a render target to create.
#[derive(Clone, Copy, Debug)]
pub struct RenderTargetDesc {
    pub size: UVec2,
    pub format: Format,
    /// Existing backing resource (e.g. a swapchain image), or
    /// [`Handle::NULL`] to allocate a fresh texture.
    pub resource: Handle<ResourceTag>,
}

/// Description of a depth stencil target to create.
#[derive(Clone, Copy, Debug)]
pub struct DepthStencilDesc {
    pub size: UVec2,
    pub format: Format,
    pub resource: Handle<ResourceTag>,
}

/// Graphics pipeline description. Shader bytecode is passed pre-loaded;
/// the context does no compilation of its own.
#[derive(Clone, Debug)]
pub struct GraphicsShaderDesc<'a> {
    pub vertex_code: &'a [u8],
    pub fragment_code: &'a [u8],
    /// Formats of the color targets this pipeline renders into.
    pub color_formats: &'a [Format],
    pub depth_format: Option<Format>,
    pub topology: PrimitiveTopology,
}

/// Compute pipeline description.
#[derive(Clone, Debug)]
pub struct ComputeShaderDesc<'a> {
    pub compute_code: &'a [u8],
}

/// One color attachment of a render pass.
#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub target: Handle<RenderTargetTag>,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: [f32; 4],
}

/// The depth attachment of a render pass.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub target: Handle<crate::handle::DepthStencilTag>,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

/// Description of one render pass.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub colors: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
}

/// Per-frame bookkeeping: the command list and backbuffer target for one
/// swapchain image, plus the fence value of the last submission that used
/// them.
#[derive(Clone, Copy, Debug)]
pub struct FrameData {
    pub command: Handle<CommandTag>,
    pub render_target: Handle<RenderTargetTag>,
    pub fence_value: u64,
}

/// Startup configuration for a render context.
#[derive(Clone, Copy, Debug)]
pub struct ContextConfig {
    /// Byte capacity of the device-local buffer heap.
    pub buffer_heap_size: u64,
    /// Byte capacity of the device-local texture heap.
    pub texture_heap_size: u64,
    /// Byte capacity of the upload staging heap.
    pub upload_heap_size: u64,
    /// Byte capacity of the readback heap.
    pub readback_heap_size: u64,
    /// Slot count of the shader-visible descriptor heap.
    pub view_descriptor_count: u32,
    /// Slot count of the render target descriptor heap.
    pub render_descriptor_count: u32,
    /// Slot count of the depth stencil descriptor heap.
    pub depth_descriptor_count: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            buffer_heap_size: 1 << 30,
            texture_heap_size: 1 << 30,
            upload_heap_size: 200 * (1 << 20),
            readback_heap_size: 10 * (1 << 20),
            view_descriptor_count: 4096,
            render_descriptor_count: 64,
            depth_descriptor_count: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_desc_size() {
        let desc = BufferDesc {
            kind: BufferKind::Storage,
            first_element: 0,
            element_count: 3,
            stride: 12,
            resource: Handle::NULL,
        };
        assert_eq!(desc.size(), 36);
    }

    #[test]
    fn test_mappable_kinds() {
        assert!(BufferKind::Staging.mappable());
        assert!(BufferKind::Readback.mappable());
        assert!(!BufferKind::Storage.mappable());
        assert!(!BufferKind::Uniform.mappable());
    }

    #[test]
    fn test_depth_formats() {
        assert!(Format::D32Float.is_depth());
        assert!(!Format::Rgba8Unorm.is_depth());
    }

    #[test]
    fn test_viewport_sized() {
        let vp = Viewport::sized(UVec2::new(1280, 720));
        assert_eq!(vp.width, 1280.0);
        assert_eq!(vp.height, 720.0);
        assert_eq!(vp.max_depth, 1.0);
    }
}
