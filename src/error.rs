//! Error types for canvas operations

use std::io;
use thiserror::Error;

/// Canvas error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while writing to the terminal or spawning a worker
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The GPU display connection could not be opened
    #[error("Failed to initialize GPU display: {0}")]
    DisplayInit(String),

    /// No GPU configuration offers a renderable, window-capable format
    #[error("No GPU configuration matches the required capabilities")]
    NoMatchingConfig,

    /// The platform rejected binding a surface to a native window
    #[error("Failed to create surface: {0}")]
    SurfaceCreation(String),

    /// The platform could not allocate a rendering context for a surface
    #[error("Failed to create context: {0}")]
    ContextCreation(String),

    /// The native overlay window could not be created
    #[error("Failed to create overlay window: {0}")]
    WindowCreation(String),

    /// A GPU call inside a scoped block failed
    #[error("GPU error: {0}")]
    Gpu(String),

    /// The frame could not be encoded for the terminal
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    /// `draw()` was called before any frame was generated
    #[error("draw() called before a frame was generated")]
    NoFrame,

    /// A GPU operation was issued with no context current on this thread
    #[error("GPU operation issued without a current context")]
    NoCurrentContext,
}

impl Error {
    /// Whether the platform refused to create a resource.
    ///
    /// These are fatal to the affected window only; the caller decides
    /// whether to fall back to another backend.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            Error::DisplayInit(_)
                | Error::NoMatchingConfig
                | Error::SurfaceCreation(_)
                | Error::ContextCreation(_)
                | Error::WindowCreation(_)
                | Error::Gpu(_)
        )
    }

    /// Whether the error indicates a defect in the calling code.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::NoFrame | Error::NoCurrentContext)
    }
}

/// Result type for canvas operations
pub type Result<T> = std::result::Result<T, Error>;
