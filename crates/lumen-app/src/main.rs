//! Windowed demo: clears the backbuffer and draws a triangle pulled
//! from a bindless storage buffer.

use std::path::Path;

use anyhow::{Context, Result};
use glam::UVec2;
use lumen_core::Timer;
use lumen_platform::Window;
use lumen_renderer::{Renderer, ShaderBlobs};
use lumen_rhi::types::ContextConfig;
use lumen_rhi::vulkan::VulkanDevice;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

const WINDOW_SIZE: UVec2 = UVec2::new(1280, 720);
const VERTEX_SHADER: &str = "shaders/spirv/triangle.vert.spv";
const FRAGMENT_SHADER: &str = "shaders/spirv/triangle.frag.spv";

struct App {
    window: Option<Window>,
    renderer: Option<Renderer<VulkanDevice>>,
    timer: Timer,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            timer: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, WINDOW_SIZE, "lumen")?;

        let device = VulkanDevice::new(
            window.raw_display_handle()?,
            window.raw_window_handle()?,
            window.size(),
            cfg!(debug_assertions),
        )?;

        let vertex = std::fs::read(Path::new(VERTEX_SHADER))
            .with_context(|| format!("reading {VERTEX_SHADER}"))?;
        let fragment = std::fs::read(Path::new(FRAGMENT_SHADER))
            .with_context(|| format!("reading {FRAGMENT_SHADER}"))?;

        let renderer = Renderer::new(
            device,
            ContextConfig::default(),
            window.size(),
            &ShaderBlobs {
                vertex: &vertex,
                fragment: &fragment,
            },
        )?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.timer.reset();
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (self.window.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };
        if window.take_resized() {
            renderer.resize(window.size())?;
            return Ok(());
        }
        let delta = self.timer.delta_secs();
        renderer.render_frame(delta)?;
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            error!("failed to initialize: {e:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(UVec2::new(size.width, size.height));
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    error!("frame failed: {e:#}");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    lumen_core::init_logging();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;
    Ok(())
}
