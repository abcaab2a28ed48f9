//! GPU overlay render window
//!
//! The frame is uploaded to a texture attached to a framebuffer, then blitted
//! into the back buffer of a surface bound to a borderless native window that
//! sits over the terminal's cell grid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{OverlayGeometry, RenderWindow, WindowOptions, Windowing};
use crate::error::{Error, Result};
use crate::gpu::{ContextId, FramebufferId, GpuContextManager, GpuPlatform, SurfaceId, TextureId};
use crate::image::PixelSource;
use crate::sync::lock;

/// GPU objects created inside the window's context
struct Targets {
    texture: TextureId,
    framebuffer: FramebufferId,
}

/// Serialised per-window GPU state
struct GlState {
    source: Box<dyn PixelSource>,
    generated: bool,
}

pub struct OverlayWindow<P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    manager: Arc<GpuContextManager<P>>,
    windowing: Arc<W>,
    /// Taken on drop
    window: Option<W::Window>,
    surface: SurfaceId,
    context: ContextId,
    targets: Targets,
    geometry: OverlayGeometry,
    gl: Mutex<GlState>,
    visible: AtomicBool,
}

/// Releases partially constructed resources, innermost first.
struct Unwind<'a, P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    manager: &'a GpuContextManager<P>,
    windowing: &'a W,
    window: Option<W::Window>,
    mapped: bool,
    surface: Option<SurfaceId>,
    context: Option<ContextId>,
    framebuffer: Option<FramebufferId>,
}

impl<P, W> Unwind<'_, P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    fn disarm(mut self) -> Option<W::Window> {
        self.surface = None;
        self.context = None;
        self.framebuffer = None;
        self.window.take()
    }
}

impl<P, W> Drop for Unwind<'_, P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    fn drop(&mut self) {
        if let (Some(surface), Some(context), Some(framebuffer)) =
            (self.surface, self.context, self.framebuffer)
        {
            let released = self.manager.run_scoped(surface, context, |gpu| {
                gpu.delete_framebuffer(framebuffer);
                Ok(())
            });
            if let Err(e) = released {
                tracing::warn!("Failed to release framebuffer during unwind: {}", e);
            }
        }
        if let Some(context) = self.context {
            self.manager.destroy_context(context);
        }
        if let Some(surface) = self.surface {
            self.manager.destroy_surface(surface);
        }
        if let Some(window) = self.window.take() {
            if self.mapped {
                self.windowing.unmap(&window);
            }
            self.windowing.destroy(window);
        }
    }
}

impl<P, W> OverlayWindow<P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    /// Create the overlay and its GPU resources.
    ///
    /// On failure everything created so far is released and the overlay, if
    /// it was already mapped, is unmapped first.
    pub fn new(
        manager: Arc<GpuContextManager<P>>,
        windowing: Arc<W>,
        source: Box<dyn PixelSource>,
        options: WindowOptions,
    ) -> Result<Self> {
        let geometry = options.geometry(source.width(), source.height());
        let window = windowing.create_overlay(geometry)?;

        let mut unwind = Unwind {
            manager: &manager,
            windowing: &*windowing,
            window: Some(window),
            mapped: false,
            surface: None,
            context: None,
            framebuffer: None,
        };

        if options.show_on_create {
            if let Some(window) = unwind.window.as_ref() {
                windowing.map(window);
            }
            unwind.mapped = true;
        }

        let surface = match unwind.window.as_ref() {
            Some(window) => manager.create_surface(window)?,
            None => return Err(Error::WindowCreation("overlay window missing".to_string())),
        };
        unwind.surface = Some(surface);

        let context = manager.create_context(surface)?;
        unwind.context = Some(context);

        let framebuffer = manager.run_scoped(surface, context, |gpu| gpu.create_framebuffer())?;
        unwind.framebuffer = Some(framebuffer);

        let texture = manager.run_scoped(surface, context, |gpu| gpu.create_texture())?;

        let visible = unwind.mapped;
        let window = unwind.disarm();
        tracing::debug!(
            "Created overlay {}x{} at ({}, {})",
            geometry.width,
            geometry.height,
            geometry.x,
            geometry.y
        );

        Ok(Self {
            manager,
            windowing,
            window,
            surface,
            context,
            targets: Targets {
                texture,
                framebuffer,
            },
            geometry,
            gl: Mutex::new(GlState {
                source,
                generated: false,
            }),
            visible: AtomicBool::new(visible),
        })
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn native_window(&self) -> Option<&W::Window> {
        self.window.as_ref()
    }

    /// Replace the pixel source. The next `generate_frame()` uploads it.
    pub fn set_source(&self, source: Box<dyn PixelSource>) {
        let mut gl = lock(&self.gl);
        gl.source = source;
    }

    /// Advance an animated source by one frame.
    pub fn next_frame(&self) {
        lock(&self.gl).source.next_frame();
    }

    /// Hide a mapped overlay after a GPU failure, then hand the error back.
    fn fail_visible(&self, error: Error) -> Error {
        tracing::warn!("Overlay GPU failure: {}", error);
        if self.visible.swap(false, Ordering::AcqRel) {
            if let Some(window) = self.window.as_ref() {
                self.windowing.unmap(window);
            }
        }
        error
    }
}

impl<P, W> RenderWindow for OverlayWindow<P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    fn generate_frame(&self) -> Result<()> {
        let mut gl = lock(&self.gl);
        let Targets {
            texture,
            framebuffer,
        } = self.targets;
        let source = &gl.source;
        self.manager
            .run_scoped(self.surface, self.context, |gpu| {
                self.manager.load_texture(source.as_ref(), texture)?;
                gpu.attach_color_target(framebuffer, texture)
            })
            .map_err(|e| self.fail_visible(e))?;
        gl.generated = true;
        drop(gl);

        if let Some(window) = self.window.as_ref() {
            self.windowing.request_redraw(window);
        }
        Ok(())
    }

    fn draw(&self) -> Result<()> {
        let gl = lock(&self.gl);
        if !self.is_visible() {
            return Ok(());
        }
        if !gl.generated {
            return Err(Error::NoFrame);
        }
        let (width, height) = (self.geometry.width, self.geometry.height);
        let framebuffer = self.targets.framebuffer;
        let surface = self.surface;
        self.manager
            .run_scoped(surface, self.context, |gpu| {
                gpu.blit_to_back_buffer(framebuffer, width, height)?;
                gpu.swap_buffers(surface)
            })
            .map_err(|e| self.fail_visible(e))
    }

    fn show(&self) {
        if !self.visible.swap(true, Ordering::AcqRel) {
            if let Some(window) = self.window.as_ref() {
                self.windowing.map(window);
            }
        }
    }

    fn hide(&self) {
        if self.visible.swap(false, Ordering::AcqRel) {
            if let Some(window) = self.window.as_ref() {
                self.windowing.unmap(window);
            }
        }
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn geometry(&self) -> OverlayGeometry {
        self.geometry
    }
}

impl<P, W> Drop for OverlayWindow<P, W>
where
    P: GpuPlatform,
    W: Windowing<Window = P::NativeWindow>,
{
    fn drop(&mut self) {
        let Targets {
            texture,
            framebuffer,
        } = self.targets;
        let released = self.manager.run_scoped(self.surface, self.context, |gpu| {
            gpu.delete_texture(texture);
            gpu.delete_framebuffer(framebuffer);
            Ok(())
        });
        if let Err(e) = released {
            tracing::error!("Failed to release overlay GPU objects: {}", e);
        }
        self.manager.destroy_context(self.context);
        self.manager.destroy_surface(self.surface);
        if let Some(window) = self.window.take() {
            if self.visible.load(Ordering::Acquire) {
                self.windowing.unmap(&window);
            }
            self.windowing.destroy(window);
        }
        tracing::debug!("Destroyed overlay {:?}", self.surface);
    }
}
