//! High level renderer: pass list and frame orchestration over the
//! render context.

pub mod pass;
pub mod renderer;

pub use pass::{FrameInfo, PassList};
pub use renderer::{Renderer, ShaderBlobs, CLEAR_COLOR};
