// =============================================================================
// HELLO TRIANGLE - Minimal Vulkan presentation pipeline
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Session (owns every Vulkan object, built in stages)      │
// │          ├── Device + queues (first suitable GPU)               │
// │          ├── Swapchain + render targets + pipeline              │
// │          └── FrameEngine (fences, semaphores, frames in flight) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one redraw):
// 1. Wait for the frame slot's fence
// 2. Acquire a swapchain image
// 3. Submit that image's pre-recorded command buffer
// 4. Present
//
// =============================================================================

mod backend;
mod config;
mod error;
mod session;

use anyhow::{Context, Result};
use ash::vk;
use config::Config;
use session::Session;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, origin) = Config::load();

    init_logging(&config);
    origin.log();
    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            log::info!("Exited cleanly");
            Ok(())
        }
    }
}

/// env_logger at the configured level; RUST_LOG still wins
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the session must go before the window it renders to.
struct App {
    config: Config,
    session: Option<Session>,
    window: Option<Window>,

    /// First fatal error, handed back to main once the loop has stopped
    fatal: Option<anyhow::Error>,
    warned_suboptimal: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            session: None,
            window: None,
            fatal: None,
            warned_suboptimal: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let session =
            Session::new(&window, extent, &self.config).context("Failed to initialize Vulkan")?;

        if let Some(surface) = session.surface_config() {
            log::info!(
                "Presenting {}x{} with {:?}, {} images",
                surface.extent.width,
                surface.extent.height,
                surface.present_mode,
                surface.image_count
            );
        }

        self.session = Some(session);
        self.window = Some(window);
        Ok(())
    }

    /// Stop the loop, keeping the first error for main
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.stop(event_loop);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.draw_frame() {
            Ok(outcome) => {
                if outcome.suboptimal && !self.warned_suboptimal {
                    log::warn!("Swapchain is suboptimal for the surface (frame {})", outcome.frame);
                    self.warned_suboptimal = true;
                }
                self.update_fps();
            }
            // Swapchain rebuild is not supported, so even a stale surface ends the run
            Err(e) => {
                let recoverable = e.is_recoverable();
                self.fail(
                    event_loop,
                    anyhow::Error::new(e).context(if recoverable {
                        "Surface changed and the swapchain cannot be rebuilt"
                    } else {
                        "Frame failed"
                    }),
                );
            }
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
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
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
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
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
                self.stop(event_loop);
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.stop(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing as fast as presentation allows
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let (Some(window), Some(_)) = (&self.window, &self.session) {
            window.request_redraw();
        }
    }
}
