//! Platform integration: windowing.

pub mod window;

pub use window::Window;
