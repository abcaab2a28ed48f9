//! wgpu-backed GPU platform
//!
//! The display connection is a `wgpu::Instance` plus the adapter chosen for
//! it. Each context is a device/queue pair configured against its surface.
//! Textures hold the frame in the surface's own format so a blit is a plain
//! texture-to-texture copy into the acquired swapchain image, and a swap
//! presents that image.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use winit::window::Window;

use super::{Binding, ConfigRequirements, ContextId, FramebufferId, GpuPlatform, SurfaceId, TextureId};
use crate::error::{Error, Result};
use crate::image::{FrameView, PixelLayout};
use crate::sync::lock;

struct Display {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
}

struct SurfaceSlot {
    surface: wgpu::Surface<'static>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    /// Acquired by a blit, presented by a swap
    back: Option<wgpu::SurfaceTexture>,
}

struct ContextSlot {
    surface: SurfaceId,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

struct TextureSlot {
    context: ContextId,
    texture: Option<wgpu::Texture>,
}

struct FramebufferSlot {
    context: ContextId,
    color: Option<TextureId>,
}

#[derive(Default)]
struct State {
    display: Option<Display>,
    next_id: u64,
    current: HashMap<ThreadId, Binding>,
    surfaces: HashMap<SurfaceId, SurfaceSlot>,
    contexts: HashMap<ContextId, ContextSlot>,
    textures: HashMap<TextureId, TextureSlot>,
    framebuffers: HashMap<FramebufferId, FramebufferSlot>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn binding(&self) -> Result<Binding> {
        self.current
            .get(&thread::current().id())
            .copied()
            .ok_or(Error::NoCurrentContext)
    }
}

/// GPU platform on top of wgpu
#[derive(Default)]
pub struct WgpuPlatform {
    state: Mutex<State>,
}

impl WgpuPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Formats a frame can be copied into without a shader pass
fn copyable_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats.iter().copied().find(|f| {
        matches!(
            f,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Rgba8Unorm
        )
    })
}

fn layout_for(format: wgpu::TextureFormat) -> PixelLayout {
    match format {
        wgpu::TextureFormat::Bgra8Unorm => PixelLayout::Bgra8,
        _ => PixelLayout::Rgba8,
    }
}

impl GpuPlatform for WgpuPlatform {
    type NativeDisplay = wgpu::Backends;
    type NativeWindow = Arc<Window>;

    fn open(&self, backends: wgpu::Backends, requirements: &ConfigRequirements) -> Result<()> {
        if requirements.color_bits > 8 {
            return Err(Error::NoMatchingConfig);
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::DisplayInit("no suitable GPU adapter".to_string()))?;

        let info = adapter.get_info();
        tracing::info!("Using GPU adapter {} ({:?})", info.name, info.backend);
        lock(&self.state).display = Some(Display { instance, adapter });
        Ok(())
    }

    fn terminate(&self) {
        let mut state = lock(&self.state);
        state.current.clear();
        state.display = None;
    }

    fn create_surface(&self, window: &Arc<Window>) -> Result<SurfaceId> {
        let mut state = lock(&self.state);
        let display = state
            .display
            .as_ref()
            .ok_or_else(|| Error::SurfaceCreation("display is not open".to_string()))?;

        let surface = display
            .instance
            .create_surface(Arc::clone(window))
            .map_err(|e| Error::SurfaceCreation(e.to_string()))?;
        let caps = surface.get_capabilities(&display.adapter);
        if caps.formats.is_empty() {
            return Err(Error::SurfaceCreation(
                "adapter cannot present to this window".to_string(),
            ));
        }
        if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            return Err(Error::SurfaceCreation(
                "surface does not accept copies".to_string(),
            ));
        }
        let format = copyable_format(&caps.formats).ok_or_else(|| {
            Error::SurfaceCreation(format!("no 8-bit unorm format in {:?}", caps.formats))
        })?;

        let size = window.inner_size();
        let id = SurfaceId(state.next());
        state.surfaces.insert(
            id,
            SurfaceSlot {
                surface,
                format,
                width: size.width.max(1),
                height: size.height.max(1),
                back: None,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        lock(&self.state).surfaces.remove(&surface);
    }

    fn create_context(&self, surface: SurfaceId) -> Result<ContextId> {
        let mut state = lock(&self.state);
        let display = state
            .display
            .as_ref()
            .ok_or_else(|| Error::ContextCreation("display is not open".to_string()))?;
        let (device, queue) = pollster::block_on(display.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("overlay"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| Error::ContextCreation(e.to_string()))?;

        let slot = state
            .surfaces
            .get(&surface)
            .ok_or_else(|| Error::ContextCreation(format!("unknown surface {:?}", surface)))?;
        let alpha_mode = slot
            .surface
            .get_capabilities(&display.adapter)
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        slot.surface.configure(
            &device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
                format: slot.format,
                width: slot.width,
                height: slot.height,
                present_mode: wgpu::PresentMode::Fifo,
                alpha_mode,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            },
        );

        let id = ContextId(state.next());
        state.contexts.insert(
            id,
            ContextSlot {
                surface,
                device,
                queue,
            },
        );
        Ok(id)
    }

    fn destroy_context(&self, context: ContextId) {
        let mut state = lock(&self.state);
        state.textures.retain(|_, t| t.context != context);
        state.framebuffers.retain(|_, f| f.context != context);
        state.contexts.remove(&context);
    }

    fn current(&self) -> Option<Binding> {
        lock(&self.state).current.get(&thread::current().id()).copied()
    }

    fn make_current(&self, binding: Option<Binding>) -> Result<()> {
        let mut state = lock(&self.state);
        let thread = thread::current().id();
        match binding {
            Some(binding) => {
                let owner = state.contexts.get(&binding.context).map(|c| c.surface);
                if owner != Some(binding.surface) {
                    return Err(Error::Gpu(format!(
                        "context {:?} was not created for surface {:?}",
                        binding.context, binding.surface
                    )));
                }
                state.current.insert(thread, binding);
            },
            None => {
                state.current.remove(&thread);
            },
        }
        Ok(())
    }

    fn create_texture(&self) -> Result<TextureId> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        let id = TextureId(state.next());
        state.textures.insert(
            id,
            TextureSlot {
                context: binding.context,
                texture: None,
            },
        );
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        if let Some(slot) = lock(&self.state).textures.remove(&texture) {
            if let Some(texture) = slot.texture {
                texture.destroy();
            }
        }
    }

    fn create_framebuffer(&self) -> Result<FramebufferId> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        let id = FramebufferId(state.next());
        state.framebuffers.insert(
            id,
            FramebufferSlot {
                context: binding.context,
                color: None,
            },
        );
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        lock(&self.state).framebuffers.remove(&framebuffer);
    }

    fn upload_texture(&self, texture: TextureId, frame: FrameView<'_>) -> Result<()> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        let format = state
            .surfaces
            .get(&binding.surface)
            .map(|s| s.format)
            .ok_or_else(|| Error::Gpu(format!("unknown surface {:?}", binding.surface)))?;
        let pixels = frame.to_frame().to_layout(layout_for(format));

        let State {
            contexts, textures, ..
        } = &mut *state;
        let context = contexts
            .get(&binding.context)
            .ok_or_else(|| Error::Gpu(format!("unknown context {:?}", binding.context)))?;
        let slot = textures
            .get_mut(&texture)
            .filter(|t| t.context == binding.context)
            .ok_or_else(|| Error::Gpu(format!("texture {:?} is not in the current context", texture)))?;

        let size = wgpu::Extent3d {
            width: pixels.width,
            height: pixels.height,
            depth_or_array_layers: 1,
        };
        let reuse = slot
            .texture
            .as_ref()
            .is_some_and(|t| t.size() == size && t.format() == format);
        if !reuse {
            if let Some(old) = slot.texture.take() {
                old.destroy();
            }
            slot.texture = Some(context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("overlay frame"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            }));
        }
        let Some(target) = slot.texture.as_ref() else {
            return Err(Error::Gpu("texture allocation failed".to_string()));
        };

        context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(pixels.width * 4),
                rows_per_image: Some(pixels.height),
            },
            size,
        );
        Ok(())
    }

    fn attach_color_target(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<()> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        let in_context = state
            .textures
            .get(&texture)
            .is_some_and(|t| t.context == binding.context);
        if !in_context {
            return Err(Error::Gpu(format!("texture {:?} is not in the current context", texture)));
        }
        let slot = state
            .framebuffers
            .get_mut(&framebuffer)
            .filter(|f| f.context == binding.context)
            .ok_or_else(|| {
                Error::Gpu(format!("framebuffer {:?} is not in the current context", framebuffer))
            })?;
        slot.color = Some(texture);
        Ok(())
    }

    fn blit_to_back_buffer(&self, framebuffer: FramebufferId, width: u32, height: u32) -> Result<()> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        let State {
            surfaces,
            contexts,
            textures,
            framebuffers,
            ..
        } = &mut *state;

        let color = framebuffers
            .get(&framebuffer)
            .filter(|f| f.context == binding.context)
            .and_then(|f| f.color)
            .ok_or_else(|| Error::Gpu(format!("framebuffer {:?} has no colour target", framebuffer)))?;
        let source = textures
            .get(&color)
            .and_then(|t| t.texture.as_ref())
            .ok_or_else(|| Error::Gpu(format!("texture {:?} was never uploaded", color)))?;
        let context = contexts
            .get(&binding.context)
            .ok_or_else(|| Error::Gpu(format!("unknown context {:?}", binding.context)))?;
        let surface = surfaces
            .get_mut(&binding.surface)
            .ok_or_else(|| Error::Gpu(format!("unknown surface {:?}", binding.surface)))?;

        if surface.back.is_none() {
            let acquired = surface
                .surface
                .get_current_texture()
                .map_err(|e| Error::Gpu(format!("failed to acquire back buffer: {}", e)))?;
            surface.back = Some(acquired);
        }
        let Some(back) = surface.back.as_ref() else {
            return Err(Error::Gpu("back buffer unavailable".to_string()));
        };

        let extent = wgpu::Extent3d {
            width: width.min(source.width()).min(back.texture.width()),
            height: height.min(source.height()).min(back.texture.height()),
            depth_or_array_layers: 1,
        };
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("overlay blit"),
            });
        encoder.copy_texture_to_texture(
            source.as_image_copy(),
            back.texture.as_image_copy(),
            extent,
        );
        context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn swap_buffers(&self, surface: SurfaceId) -> Result<()> {
        let mut state = lock(&self.state);
        let binding = state.binding()?;
        if binding.surface != surface {
            return Err(Error::Gpu(format!("surface {:?} is not current", surface)));
        }
        let back = state
            .surfaces
            .get_mut(&surface)
            .and_then(|s| s.back.take())
            .ok_or_else(|| Error::Gpu("swap without a blit".to_string()))?;
        back.present();
        Ok(())
    }
}
