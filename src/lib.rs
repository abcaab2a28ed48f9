//! Mochi Canvas Library
//!
//! Draws images over a terminal, either inline as sixel escape sequences or
//! in GPU-composited overlay windows placed on the terminal's cell grid.
//!
//! - `image`: pixel sources (still images and decoded video streams)
//! - `gpu`: display connection and scoped context management
//! - `window`: the render window contract and its two backends
//! - `sixel`: sixel encoder and decoder
//! - `canvas`: identifier to window registry driven by a controller
//! - `headless`: in-memory GPU, windowing and terminal stand-ins

pub mod canvas;
pub mod config;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod image;
pub mod output;
pub mod sixel;
mod sync;
pub mod window;

pub use canvas::Canvas;
pub use config::{BackendKind, Config, ConfigError};
pub use error::{Error, Result};
pub use gpu::{GpuContextManager, GpuPlatform};
pub use image::{Frame, PixelLayout, PixelSource, StillImage, VideoStream};
pub use output::SharedOutput;
pub use window::{OverlayWindow, RenderWindow, SixelWindow, WindowOptions, Windowing};
