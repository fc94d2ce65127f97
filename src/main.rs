// =============================================================================
// FRAME PACER - windowed demo of the presentation engine
// =============================================================================
//
// Opens a window, draws a colored triangle over the configured clear color
// every frame, and keeps presenting across resizes, minimize and fullscreen
// toggles.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── RenderContext (frame driver)                             │
// │          ├── SyncRegistry (fences, semaphores per frame slot)   │
// │          ├── Swapchain (images, views, framebuffers)            │
// │          └── CommandRecorder (one buffer per frame slot)        │
// │    └── RenderContent (TrianglePass or ClearPass)                │
// │    └── VulkanDevice (instance, surface, device, allocator)      │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

use anyhow::{Context, Result};
use frame_pacer::backend::{FrameOutcome, RenderContent, RenderContext, VulkanDevice};
use frame_pacer::config::{Config, ContentKind};
use frame_pacer::render::{ClearPass, TrianglePass};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame pacer");
    log::info!("Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}, frames in flight: {}",
        config.graphics.present_mode,
        config.frames_in_flight()
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally into a fresh log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Frame Pacer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // Drop order: frame driver, then content, then device, then window
    context: Option<RenderContext<VulkanDevice, Window>>,
    content: Option<Box<dyn RenderContent>>,
    device: Option<Arc<VulkanDevice>>,
    window: Option<Arc<Window>>,

    is_fullscreen: bool,

    // FPS tracking
    frame_count: u32,
    last_frame_time: Instant,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            context: None,
            content: None,
            device: None,
            window: None,
            is_fullscreen,
            frame_count: 0,
            last_frame_time: now,
            last_fps_update: now,
        }
    }

    /// Device bound to the window's surface, then the frame driver on top
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // Validation only in debug builds
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&self.config.window.title, enable_validation, window.as_ref())?;

        let mut context = RenderContext::new(device.clone(), window.clone(), self.config.context_options())
            .context("Failed to create render context")?;

        self.content = Some(self.create_content(&device, &mut context));
        self.context = Some(context);
        self.device = Some(device);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// The configured content, or a plain clear if the triangle can't be set up
    fn create_content(
        &self,
        device: &Arc<VulkanDevice>,
        context: &mut RenderContext<VulkanDevice, Window>,
    ) -> Box<dyn RenderContent> {
        let clear_color = self.config.graphics.clear_color;

        if self.config.content() == ContentKind::Triangle {
            match TrianglePass::new(device.clone(), context, &self.config.graphics.shader_dir, clear_color) {
                Ok(triangle) => return Box::new(triangle),
                Err(e) => log::warn!("Triangle content unavailable, clearing only: {:?}", e),
            }
        }
        Box::new(ClearPass::new(device.clone(), clear_color))
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        let (Some(context), Some(content)) = (self.context.as_mut(), self.content.as_mut()) else {
            return Ok(());
        };

        match context.draw_frame(content.as_mut())? {
            FrameOutcome::Presented { .. } | FrameOutcome::PresentedStale { .. } => self.update_fps(),
            FrameOutcome::Skipped => {}
        }
        Ok(())
    }

    /// Release GPU state at a frame boundary. Safe to call more than once.
    fn shutdown(&mut self) {
        if let Some(mut context) = self.context.take() {
            if let Err(e) = context.shutdown() {
                log::error!("Shutdown failed: {:?}", e);
            }
        }
        self.content = None;
        self.device = None;
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:?}", error);
        self.shutdown();
        event_loop.exit();
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The resulting Resized event rebuilds the chain
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        self.window = Some(window.clone());

        if let Err(e) = self.init_vulkan(window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                // Zero size (minimized) is picked up by the next frame
                if size.width > 0 && size.height > 0 {
                    if let Some(context) = self.context.as_mut() {
                        if let Err(e) = context.on_resize() {
                            self.fail(event_loop, e);
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing as fast as the present mode allows
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
