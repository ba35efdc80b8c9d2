// =============================================================================
// VK-ENGINE - application driver
// =============================================================================
//
// Owns the window, the camera and one Engine; everything Vulkan lives behind
// the engine.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (ApplicationHandler)                          │
// │    └── App: window, camera, input                               │
// │          └── Engine<VulkanDevice>                               │
// │                └── swapchain, pipeline, frames in flight        │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Window/input events update the camera controller
// 2. RedrawRequested: update camera, draw_frame(view, projection)
// 3. about_to_wait: request the next redraw
// 4. On exit: wait_idle, cleanup, drop the device, then the window
//
// With `run.headless_frames` set, the same engine runs on the simulated
// device instead and the process exits after that many frames.
//
// =============================================================================

mod camera;
mod config;

use anyhow::{bail, Context, Result};
use camera::{Camera, CameraController};
use config::Config;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use vk_engine::{assets, DeviceSettings, Engine, FrameOutcome, NullGpu, SceneAssets, VulkanDevice};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting vk-engine");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode preference: {:?}", config.graphics.present_mode_preference);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    if let Some(frames) = config.run.headless_frames {
        return run_headless(&config, frames);
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging; with `log_to_file` the log goes to a fresh file
/// instead of stderr.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                if let Err(e) = write_log_header(&mut file) {
                    eprintln!("Cannot write to log file {}: {}", config.debug.log_file, e);
                }
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

fn write_log_header(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "=== vk-engine log ===")?;
    writeln!(out, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(out)
}

fn load_assets(config: &Config) -> Result<SceneAssets> {
    assets::load_scene(config.assets.model.as_deref(), config.assets.texture.as_deref())
        .context("Failed to load assets")
}

// =============================================================================
// HEADLESS RUN (simulated device)
// =============================================================================

fn run_headless(config: &Config, frames: u32) -> Result<()> {
    log::info!("Headless run: {} frames on the simulated device", frames);

    let gpu = NullGpu::new();
    let assets = load_assets(config)?;
    let (width, height) = (config.window.width, config.window.height);

    let mut engine = Engine::init(gpu.clone(), &config.engine(), (width, height), &assets)
        .context("Failed to initialize engine")?;

    let camera = Camera::default();
    let aspect = width as f32 / height.max(1) as f32;
    for _ in 0..frames {
        engine
            .draw_frame(camera.view(), camera.projection(aspect))
            .context("Frame failed")?;
    }

    let stats = engine.stats();
    engine.cleanup().context("Cleanup failed")?;

    let live = gpu.live_handles();
    let violations = gpu.violations();
    log::info!(
        "Headless report: {} rendered, {} skipped, {} swapchain recreations, {} presents, {} objects created, {} alive",
        stats.frames_rendered,
        stats.frames_skipped,
        stats.swapchain_recreations,
        gpu.presents().len(),
        gpu.created_handles().len(),
        live.len()
    );
    for violation in &violations {
        log::error!("Protocol violation: {}", violation);
    }

    if !live.is_empty() {
        bail!("{} objects outlived cleanup", live.len());
    }
    if !violations.is_empty() {
        bail!("{} protocol violations", violations.len());
    }
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Windowed application.
///
/// IMPORTANT: `engine` is declared before `window` so that, even without an
/// explicit shutdown, the device (and its surface) is dropped before the
/// window it was created for.
struct App {
    config: Config,
    engine: Option<Engine<VulkanDevice>>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // Camera
    camera: Camera,
    controller: CameraController,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,

    /// First fatal error; returned from `run` after the loop exits
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            engine: None,
            window: None,
            is_fullscreen,
            camera: Camera::default(),
            controller: CameraController::default(),
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
            failure: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&self, window: &Window) -> Result<Engine<VulkanDevice>> {
        let assets = load_assets(&self.config)?;

        let device = VulkanDevice::new(
            window,
            &DeviceSettings {
                app_name: self.config.window.title.clone(),
                validation: self.config.debug.validation_layers,
            },
        )
        .context("Failed to create Vulkan device")?;

        let size = window.inner_size();
        Engine::init(device, &self.config.engine(), (size.width, size.height), &assets)
            .context("Failed to initialize engine")
    }

    /// Record a fatal error and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    fn render(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        let (Some(engine), Some(window)) = (self.engine.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        self.controller.update(&mut self.camera, dt);

        let size = window.inner_size();
        let aspect = size.width as f32 / size.height.max(1) as f32;
        let outcome = engine.draw_frame(self.camera.view(), self.camera.projection(aspect))?;

        if let FrameOutcome::Rendered { .. } = outcome {
            self.update_fps();
        }
        Ok(())
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
                    1000.0 / fps.max(f32::EPSILON)
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    fn shutdown(&mut self) -> Result<()> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };

        let stats = engine.stats();
        log::info!(
            "Shutting down after {} frames ({} skipped, {} swapchain recreations)",
            stats.frames_rendered,
            stats.frames_skipped,
            stats.swapchain_recreations
        );

        engine.wait_idle().context("Failed waiting for the device")?;
        let device = engine.cleanup().context("Cleanup failed")?;
        drop(device);
        log::info!("Device destroyed");
        Ok(())
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
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
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED (0x0 when minimized)
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.resize(size.width, size.height);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e.context("Render error"));
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() && !event.repeat {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                    self.controller.key(key, event.state);
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                self.controller.mouse_button(button, state);
                if let Some(ref window) = self.window {
                    window.set_cursor_visible(!self.controller.is_looking());
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.controller.cursor_moved(position.x, position.y);
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    /// Tear the renderer down while the window still exists.
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Err(e) = self.shutdown() {
            log::error!("{:#}", e);
            if self.failure.is_none() {
                self.failure = Some(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_header_names_the_engine() {
        let mut out = Vec::new();
        write_log_header(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("=== vk-engine log ===\n"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn log_header_write_errors_are_reported() {
        assert!(write_log_header(&mut FullDisk).is_err());
    }
}
