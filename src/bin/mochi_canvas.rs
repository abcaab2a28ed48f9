//! Mochi Canvas - draw a test pattern over the terminal
//!
//! ```bash
//! # Still image through sixel at column 4, row 2
//! mochi-canvas --col 4 --row 2
//!
//! # Animated pattern for three seconds
//! mochi-canvas --frames 24 --fps 12 --duration 3
//!
//! # GPU overlay (needs --features gui; falls back to the headless platform)
//! mochi-canvas --backend gpu
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mochi_canvas::headless::{HeadlessGpu, HeadlessWindowing};
use mochi_canvas::image::FrameSequence;
use mochi_canvas::{
    BackendKind, Canvas, Config, Frame, GpuContextManager, GpuPlatform, OverlayWindow,
    PixelSource, RenderWindow, SharedOutput, StillImage, VideoStream, Windowing,
};

/// CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "mochi-canvas")]
#[command(version)]
#[command(about = "Draw images over a terminal with sixel or a GPU overlay", long_about = None)]
struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend (sixel, gpu)
    #[arg(short, long, value_name = "BACKEND")]
    backend: Option<String>,

    /// Zero-based terminal column of the image
    #[arg(long, default_value_t = 0)]
    col: u16,

    /// Zero-based terminal row of the image
    #[arg(long, default_value_t = 0)]
    row: u16,

    /// Test pattern width in pixels
    #[arg(long, default_value_t = 128)]
    width: u32,

    /// Test pattern height in pixels
    #[arg(long, default_value_t = 96)]
    height: u32,

    /// Number of animation frames, 1 for a still image
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Animation frame rate
    #[arg(long, default_value_t = 12)]
    fps: u32,

    /// Seconds to keep an animation running
    #[arg(long, default_value_t = 3)]
    duration: u64,

    /// Sixel palette size (2-256)
    #[arg(long, value_name = "COLORS")]
    max_colors: Option<u16>,

    /// Disable dithering
    #[arg(long)]
    no_dither: bool,

    /// Use the in-memory GPU platform even when built with `gui`
    #[arg(long)]
    headless: bool,
}

impl CliArgs {
    /// Load configuration with precedence: CLI > file > defaults
    fn config(&self) -> Result<Config, String> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).map_err(|e| format!("{}: {}", path.display(), e))?,
            None => Config::load_or_default(),
        };
        if let Some(name) = &self.backend {
            config.backend =
                BackendKind::from_name(name).ok_or_else(|| format!("unknown backend: {}", name))?;
        }
        if let Some(colors) = self.max_colors {
            config.sixel.max_colors = colors;
        }
        if self.no_dither {
            config.sixel.dither = false;
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    fn source(&self, config: &Config) -> Result<Box<dyn PixelSource>, String> {
        if self.frames <= 1 {
            let frame = Frame::gradient(self.width, self.height, 0);
            return Ok(Box::new(StillImage::new(frame, config.max_width, config.max_height)));
        }
        let step = (256 / self.frames).max(1);
        let frames = (0..self.frames)
            .map(|i| Frame::gradient(self.width, self.height, (i * step) as u8))
            .collect();
        let stream = VideoStream::new(
            FrameSequence::new(frames, self.fps),
            config.max_width,
            config.max_height,
            true,
        )
        .map_err(|e| e.to_string())?;
        Ok(Box::new(stream))
    }

    fn run_time(&self) -> Duration {
        if self.frames <= 1 {
            Duration::ZERO
        } else {
            Duration::from_secs(self.duration)
        }
    }
}

fn run_sixel(args: &CliArgs, config: Config) -> Result<(), String> {
    let source = args.source(&config)?;
    let mut canvas = Canvas::new(config, SharedOutput::stdout());
    canvas
        .add_sixel("pattern", source, args.col, args.row)
        .map_err(|e| e.to_string())?;
    canvas.handle_expose("pattern").map_err(|e| e.to_string())?;

    // The window's worker animates the source on its own
    thread::sleep(args.run_time());
    canvas.clear();
    Ok(())
}

/// Drive one overlay window: draw once, then advance until the run time ends.
fn drive_overlay<P, W>(
    args: &CliArgs,
    window: &OverlayWindow<P, W>,
    frame_interval: Duration,
) -> Result<u64, String>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    window.show();
    window.generate_frame().map_err(|e| e.to_string())?;
    window.draw().map_err(|e| e.to_string())?;
    let mut drawn = 1;

    let deadline = Instant::now() + args.run_time();
    while Instant::now() < deadline {
        thread::sleep(frame_interval);
        window.next_frame();
        window.generate_frame().map_err(|e| e.to_string())?;
        window.draw().map_err(|e| e.to_string())?;
        drawn += 1;
    }
    Ok(drawn)
}

fn frame_interval(fps: u32) -> Duration {
    Duration::from_millis(1000 / fps.max(1) as u64)
}

fn run_headless_gpu(args: &CliArgs, config: Config) -> Result<(), String> {
    let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).map_err(|e| e.to_string())?;
    let windowing = Arc::new(HeadlessWindowing::new());
    let window = OverlayWindow::new(
        Arc::clone(&manager),
        windowing,
        args.source(&config)?,
        config.window_options(args.col, args.row),
    )
    .map_err(|e| e.to_string())?;

    let drawn = drive_overlay(args, &window, frame_interval(args.fps))?;
    let geometry = window.geometry();
    let swaps = manager.platform().swap_count(window.surface());
    println!(
        "headless overlay {}x{} at ({}, {}): {} frames drawn, {} presented",
        geometry.width, geometry.height, geometry.x, geometry.y, drawn, swaps
    );
    Ok(())
}

#[cfg(feature = "gui")]
fn run_gpu(args: &CliArgs, config: Config) -> Result<(), String> {
    use mochi_canvas::gpu::wgpu_platform::WgpuPlatform;
    use mochi_canvas::window::winit_overlay::{handle_request, OverlayRequest, WinitWindowing};
    use winit::event::Event;
    use winit::event_loop::EventLoopBuilder;

    let event_loop = EventLoopBuilder::<OverlayRequest>::with_user_event()
        .build()
        .map_err(|e| format!("Failed to create event loop: {}", e))?;
    let windowing = Arc::new(WinitWindowing::new(event_loop.create_proxy()));
    let parent = config.overlay.parent_window;

    let worker_args = args.clone();
    let worker = thread::Builder::new()
        .name("overlay".to_string())
        .spawn(move || {
            let result = (|| {
                let manager = GpuContextManager::initialize(WgpuPlatform::new(), wgpu::Backends::all())
                    .map_err(|e| e.to_string())?;
                let window = OverlayWindow::new(
                    manager,
                    Arc::clone(&windowing),
                    worker_args.source(&config)?,
                    config.window_options(worker_args.col, worker_args.row),
                )
                .map_err(|e| e.to_string())?;
                drive_overlay(&worker_args, &window, frame_interval(worker_args.fps))
            })();
            windowing.shutdown();
            result
        })
        .map_err(|e| format!("Failed to spawn overlay thread: {}", e))?;

    event_loop
        .run(move |event, target| {
            if let Event::UserEvent(request) = event {
                handle_request(target, request, parent);
            }
        })
        .map_err(|e| format!("Event loop error: {}", e))?;

    let drawn = worker
        .join()
        .map_err(|_| "overlay thread panicked".to_string())??;
    tracing::info!("Overlay drew {} frames", drawn);
    Ok(())
}

fn run(args: &CliArgs) -> Result<(), String> {
    let config = args.config()?;
    tracing::debug!("Backend: {:?}", config.backend);
    match config.backend {
        BackendKind::Sixel => run_sixel(args, config),
        #[cfg(feature = "gui")]
        BackendKind::Gpu if !args.headless => run_gpu(args, config),
        BackendKind::Gpu => run_headless_gpu(args, config),
    }
}

fn main() -> ExitCode {
    // Logs go to stderr so they never land inside the sixel stream on stdout
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    if let Err(e) = run(&args) {
        tracing::error!("Error: {}", e);
        eprintln!("mochi-canvas: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
