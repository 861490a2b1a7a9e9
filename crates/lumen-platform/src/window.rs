//! Window management using winit.

use std::sync::Arc;

use glam::UVec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use lumen_core::{Error, Result};

/// A window wrapper that tracks its size and a pending-resize flag.
///
/// Resize events only record the new size; the renderer picks the change up
/// at the top of the next frame via [`Window::take_resized`], so the
/// swapchain is rebuilt at most once per frame.
pub struct Window {
    window: Arc<WinitWindow>,
    size: UVec2,
    resized: bool,
}

impl Window {
    /// Create a new window with the given dimensions and title.
    pub fn new(event_loop: &ActiveEventLoop, size: UVec2, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.x, size.y))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", size.x, size.y);

        Ok(Self {
            window: Arc::new(window),
            size,
            resized: false,
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current size in physical pixels.
    #[inline]
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Aspect ratio of the window.
    pub fn aspect_ratio(&self) -> f32 {
        self.size.x as f32 / self.size.y as f32
    }

    /// Record a resize event. Zero-sized events (minimization) are ignored.
    pub fn resize(&mut self, size: UVec2) {
        if size.x == 0 || size.y == 0 {
            return;
        }
        if size != self.size {
            self.size = size;
            self.resized = true;
            tracing::debug!("Window resized: {}x{}", size.x, size.y);
        }
    }

    /// Returns true once per recorded resize, then clears the flag.
    pub fn take_resized(&mut self) -> bool {
        std::mem::replace(&mut self.resized, false)
    }

    /// Raw display handle for surface creation.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        Ok(self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?
            .as_raw())
    }

    /// Raw window handle for surface creation.
    pub fn raw_window_handle(&self) -> Result<RawWindowHandle> {
        Ok(self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?
            .as_raw())
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
