//! GPU context management
//!
//! One display connection is shared by every overlay window. Each window owns
//! a surface/context pair created from it, and every GPU call goes through
//! `GpuContextManager::run_scoped`, which makes the pair current for the
//! calling thread and restores whatever was current before.
//!
//! The driver itself sits behind `GpuPlatform`. Operations on textures and
//! framebuffers act on the context current on the calling thread, the way
//! EGL/GL drivers behave.

mod manager;
#[cfg(feature = "gui")]
pub mod wgpu_platform;

pub use manager::GpuContextManager;

use crate::error::Result;
use crate::image::FrameView;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

gpu_handle!(
    /// Drawable bound to a native window
    SurfaceId
);
gpu_handle!(
    /// Rendering context allocated for a surface
    ContextId
);
gpu_handle!(
    /// Texture object in a context
    TextureId
);
gpu_handle!(
    /// Framebuffer object in a context
    FramebufferId
);

/// A surface/context pair made current together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub surface: SurfaceId,
    pub context: ContextId,
}

/// Capabilities the chosen configuration must offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRequirements {
    /// Must be usable as a render target
    pub renderable: bool,
    /// Must be able to back a native window surface
    pub window_surface: bool,
    /// Minimum bits per colour channel
    pub color_bits: u8,
}

impl Default for ConfigRequirements {
    fn default() -> Self {
        Self {
            renderable: true,
            window_surface: true,
            color_bits: 8,
        }
    }
}

/// The GPU driver seen by the context manager.
///
/// Implementations track the current binding per thread. Texture and
/// framebuffer calls use the current binding and fail with
/// `Error::NoCurrentContext` when there is none.
pub trait GpuPlatform: Send + Sync + 'static {
    /// Handle used to open the display connection
    type NativeDisplay;
    /// Native window a surface is bound to
    type NativeWindow: Send + Sync;

    /// Open the display and choose one configuration satisfying `requirements`.
    fn open(&self, display: Self::NativeDisplay, requirements: &ConfigRequirements) -> Result<()>;

    /// Close the display connection.
    fn terminate(&self);

    fn create_surface(&self, window: &Self::NativeWindow) -> Result<SurfaceId>;
    fn destroy_surface(&self, surface: SurfaceId);
    fn create_context(&self, surface: SurfaceId) -> Result<ContextId>;
    fn destroy_context(&self, context: ContextId);

    /// Binding current on the calling thread.
    fn current(&self) -> Option<Binding>;

    /// Make `binding` current on the calling thread, or release it with `None`.
    fn make_current(&self, binding: Option<Binding>) -> Result<()>;

    fn create_texture(&self) -> Result<TextureId>;
    fn delete_texture(&self, texture: TextureId);
    fn create_framebuffer(&self) -> Result<FramebufferId>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    /// Replace the contents of `texture` with `frame`.
    fn upload_texture(&self, texture: TextureId, frame: FrameView<'_>) -> Result<()>;

    /// Attach `texture` as the colour target of `framebuffer`.
    fn attach_color_target(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<()>;

    /// Copy `width x height` pixels from `framebuffer` into the back buffer.
    fn blit_to_back_buffer(&self, framebuffer: FramebufferId, width: u32, height: u32)
        -> Result<()>;

    /// Present the back buffer of `surface`.
    fn swap_buffers(&self, surface: SurfaceId) -> Result<()>;
}
