//! Headless platform
//!
//! In-memory stand-ins for the GPU driver, the windowing system and the
//! terminal stream. They behave like the real ones where it matters for
//! correctness (per-thread current binding, object ownership by context,
//! one chunk per flushed write) and record every call so tests and the
//! `--headless` CLI mode can inspect what happened.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::error::{Error, Result};
use crate::gpu::{
    Binding, ConfigRequirements, ContextId, FramebufferId, GpuPlatform, SurfaceId, TextureId,
};
use crate::image::{Frame, FrameView, PixelLayout};
use crate::sync::lock;
use crate::window::{OverlayGeometry, Windowing};

/// GPU calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFault {
    Open,
    Config,
    Surface,
    Context,
    Texture,
    Framebuffer,
    Upload,
    Blit,
    Swap,
}

/// One recorded GPU call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCall {
    Open,
    Terminate,
    CreateSurface(SurfaceId),
    DestroySurface(SurfaceId),
    CreateContext(ContextId),
    DestroyContext(ContextId),
    MakeCurrent(Option<Binding>),
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    Upload(TextureId, u32, u32),
    Attach(FramebufferId, TextureId),
    Blit(FramebufferId, u32, u32),
    Swap(SurfaceId),
}

#[derive(Default)]
struct SurfaceState {
    back: Option<Frame>,
    front: Option<Frame>,
    swaps: u64,
}

#[derive(Default)]
struct GpuState {
    open: bool,
    next_id: u64,
    current: HashMap<ThreadId, Binding>,
    surfaces: HashMap<SurfaceId, SurfaceState>,
    contexts: HashMap<ContextId, SurfaceId>,
    textures: HashMap<TextureId, (ContextId, Option<Frame>)>,
    framebuffers: HashMap<FramebufferId, (ContextId, Option<TextureId>)>,
    faults: HashSet<GpuFault>,
    calls: Vec<GpuCall>,
}

impl GpuState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fail(&self, fault: GpuFault) -> Result<()> {
        if !self.faults.contains(&fault) {
            return Ok(());
        }
        Err(match fault {
            GpuFault::Open => Error::DisplayInit("injected failure".to_string()),
            GpuFault::Config => Error::NoMatchingConfig,
            GpuFault::Surface => Error::SurfaceCreation("injected failure".to_string()),
            GpuFault::Context => Error::ContextCreation("injected failure".to_string()),
            _ => Error::Gpu(format!("injected {:?} failure", fault)),
        })
    }

    fn current_context(&self) -> Result<ContextId> {
        self.current
            .get(&thread::current().id())
            .map(|binding| binding.context)
            .ok_or(Error::NoCurrentContext)
    }
}

/// In-memory GPU driver
#[derive(Default)]
pub struct HeadlessGpu {
    state: Mutex<GpuState>,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `fault` call fail until `clear_fault`.
    pub fn inject_fault(&self, fault: GpuFault) {
        lock(&self.state).faults.insert(fault);
    }

    pub fn clear_fault(&self, fault: GpuFault) {
        lock(&self.state).faults.remove(&fault);
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        lock(&self.state).calls.clone()
    }

    /// Frame last presented on `surface` by `swap_buffers`.
    pub fn presented(&self, surface: SurfaceId) -> Option<Frame> {
        lock(&self.state)
            .surfaces
            .get(&surface)
            .and_then(|s| s.front.clone())
    }

    pub fn swap_count(&self, surface: SurfaceId) -> u64 {
        lock(&self.state)
            .surfaces
            .get(&surface)
            .map_or(0, |s| s.swaps)
    }

    /// Live texture and framebuffer objects across every context.
    pub fn live_objects(&self) -> usize {
        let state = lock(&self.state);
        state.textures.len() + state.framebuffers.len()
    }
}

impl GpuPlatform for HeadlessGpu {
    type NativeDisplay = ();
    type NativeWindow = HeadlessWindow;

    fn open(&self, _display: (), requirements: &ConfigRequirements) -> Result<()> {
        let mut state = lock(&self.state);
        state.fail(GpuFault::Open)?;
        state.fail(GpuFault::Config)?;
        if requirements.color_bits > 8 {
            return Err(Error::NoMatchingConfig);
        }
        state.open = true;
        state.calls.push(GpuCall::Open);
        Ok(())
    }

    fn terminate(&self) {
        let mut state = lock(&self.state);
        state.open = false;
        state.current.clear();
        state.calls.push(GpuCall::Terminate);
    }

    fn create_surface(&self, _window: &HeadlessWindow) -> Result<SurfaceId> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(Error::SurfaceCreation("display is not open".to_string()));
        }
        state.fail(GpuFault::Surface)?;
        let surface = SurfaceId(state.next());
        state.surfaces.insert(surface, SurfaceState::default());
        state.calls.push(GpuCall::CreateSurface(surface));
        Ok(surface)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        let mut state = lock(&self.state);
        state.surfaces.remove(&surface);
        state.calls.push(GpuCall::DestroySurface(surface));
    }

    fn create_context(&self, surface: SurfaceId) -> Result<ContextId> {
        let mut state = lock(&self.state);
        if !state.surfaces.contains_key(&surface) {
            return Err(Error::ContextCreation(format!("unknown surface {:?}", surface)));
        }
        state.fail(GpuFault::Context)?;
        let context = ContextId(state.next());
        state.contexts.insert(context, surface);
        state.calls.push(GpuCall::CreateContext(context));
        Ok(context)
    }

    fn destroy_context(&self, context: ContextId) {
        let mut state = lock(&self.state);
        state.contexts.remove(&context);
        state.textures.retain(|_, (owner, _)| *owner != context);
        state.framebuffers.retain(|_, (owner, _)| *owner != context);
        state.calls.push(GpuCall::DestroyContext(context));
    }

    fn current(&self) -> Option<Binding> {
        lock(&self.state).current.get(&thread::current().id()).copied()
    }

    fn make_current(&self, binding: Option<Binding>) -> Result<()> {
        let mut state = lock(&self.state);
        let thread = thread::current().id();
        match binding {
            Some(binding) => {
                if state.contexts.get(&binding.context) != Some(&binding.surface) {
                    return Err(Error::Gpu(format!(
                        "context {:?} does not belong to surface {:?}",
                        binding.context, binding.surface
                    )));
                }
                let elsewhere = state
                    .current
                    .iter()
                    .any(|(owner, bound)| *owner != thread && bound.context == binding.context);
                if elsewhere {
                    return Err(Error::Gpu(format!(
                        "context {:?} is current on another thread",
                        binding.context
                    )));
                }
                state.current.insert(thread, binding);
            },
            None => {
                state.current.remove(&thread);
            },
        }
        state.calls.push(GpuCall::MakeCurrent(binding));
        Ok(())
    }

    fn create_texture(&self) -> Result<TextureId> {
        let mut state = lock(&self.state);
        let context = state.current_context()?;
        state.fail(GpuFault::Texture)?;
        let texture = TextureId(state.next());
        state.textures.insert(texture, (context, None));
        state.calls.push(GpuCall::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = lock(&self.state);
        state.textures.remove(&texture);
        state.calls.push(GpuCall::DeleteTexture(texture));
    }

    fn create_framebuffer(&self) -> Result<FramebufferId> {
        let mut state = lock(&self.state);
        let context = state.current_context()?;
        state.fail(GpuFault::Framebuffer)?;
        let framebuffer = FramebufferId(state.next());
        state.framebuffers.insert(framebuffer, (context, None));
        state.calls.push(GpuCall::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut state = lock(&self.state);
        state.framebuffers.remove(&framebuffer);
        state.calls.push(GpuCall::DeleteFramebuffer(framebuffer));
    }

    fn upload_texture(&self, texture: TextureId, frame: FrameView<'_>) -> Result<()> {
        let mut state = lock(&self.state);
        let context = state.current_context()?;
        state.fail(GpuFault::Upload)?;
        let Some((owner, contents)) = state.textures.get_mut(&texture) else {
            return Err(Error::Gpu(format!("unknown texture {:?}", texture)));
        };
        if *owner != context {
            return Err(Error::Gpu(format!("texture {:?} is not in the current context", texture)));
        }
        *contents = Some(frame.to_frame().to_layout(PixelLayout::Rgba8));
        state
            .calls
            .push(GpuCall::Upload(texture, frame.width, frame.height));
        Ok(())
    }

    fn attach_color_target(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<()> {
        let mut state = lock(&self.state);
        let context = state.current_context()?;
        if state.textures.get(&texture).map(|(owner, _)| *owner) != Some(context) {
            return Err(Error::Gpu(format!("texture {:?} is not in the current context", texture)));
        }
        let Some((owner, target)) = state.framebuffers.get_mut(&framebuffer) else {
            return Err(Error::Gpu(format!("unknown framebuffer {:?}", framebuffer)));
        };
        if *owner != context {
            return Err(Error::Gpu(format!(
                "framebuffer {:?} is not in the current context",
                framebuffer
            )));
        }
        *target = Some(texture);
        state.calls.push(GpuCall::Attach(framebuffer, texture));
        Ok(())
    }

    fn blit_to_back_buffer(&self, framebuffer: FramebufferId, width: u32, height: u32) -> Result<()> {
        let mut state = lock(&self.state);
        let context = state.current_context()?;
        state.fail(GpuFault::Blit)?;
        let surface = state.contexts.get(&context).copied();
        let texture = match state.framebuffers.get(&framebuffer) {
            Some((owner, Some(texture))) if *owner == context => *texture,
            Some((owner, None)) if *owner == context => {
                return Err(Error::Gpu(format!("framebuffer {:?} has no colour target", framebuffer)))
            },
            _ => {
                return Err(Error::Gpu(format!(
                    "framebuffer {:?} is not in the current context",
                    framebuffer
                )))
            },
        };
        let contents = state
            .textures
            .get(&texture)
            .and_then(|(_, contents)| contents.clone());
        if let Some(target) = surface {
            if let Some(slot) = state.surfaces.get_mut(&target) {
                slot.back = contents;
            }
        }
        state.calls.push(GpuCall::Blit(framebuffer, width, height));
        Ok(())
    }

    fn swap_buffers(&self, surface: SurfaceId) -> Result<()> {
        let mut state = lock(&self.state);
        let thread = thread::current().id();
        if state.current.get(&thread).map(|b| b.surface) != Some(surface) {
            return Err(Error::Gpu(format!("surface {:?} is not current", surface)));
        }
        state.fail(GpuFault::Swap)?;
        if let Some(target) = state.surfaces.get_mut(&surface) {
            target.front = target.back.clone();
            target.swaps += 1;
        }
        state.calls.push(GpuCall::Swap(surface));
        Ok(())
    }
}

/// Handle to a headless overlay window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessWindow {
    pub id: u64,
}

/// One recorded windowing event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Create(HeadlessWindow, OverlayGeometry),
    Map(HeadlessWindow),
    Unmap(HeadlessWindow),
    Expose(HeadlessWindow),
    Destroy(HeadlessWindow),
}

#[derive(Default)]
struct WindowingState {
    next_id: u64,
    fail_create: bool,
    mapped: HashSet<HeadlessWindow>,
    alive: HashSet<HeadlessWindow>,
    events: Vec<WindowEvent>,
}

/// In-memory windowing system
#[derive(Default)]
pub struct HeadlessWindowing {
    state: Mutex<WindowingState>,
}

impl HeadlessWindowing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }

    pub fn events(&self) -> Vec<WindowEvent> {
        lock(&self.state).events.clone()
    }

    pub fn is_mapped(&self, window: HeadlessWindow) -> bool {
        lock(&self.state).mapped.contains(&window)
    }

    /// Map and unmap events issued for `window`.
    pub fn transitions(&self, window: HeadlessWindow) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, WindowEvent::Map(w) | WindowEvent::Unmap(w) if *w == window))
            .count()
    }

    /// Expose requests issued for `window`.
    pub fn exposes(&self, window: HeadlessWindow) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, WindowEvent::Expose(w) if *w == window))
            .count()
    }

    /// Windows created and not yet destroyed.
    pub fn alive(&self) -> usize {
        lock(&self.state).alive.len()
    }

    /// Most recently created window.
    pub fn last_window(&self) -> Option<HeadlessWindow> {
        lock(&self.state).events.iter().rev().find_map(|e| match e {
            WindowEvent::Create(w, _) => Some(*w),
            _ => None,
        })
    }
}

impl Windowing for HeadlessWindowing {
    type Window = HeadlessWindow;

    fn create_overlay(&self, geometry: OverlayGeometry) -> Result<HeadlessWindow> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(Error::WindowCreation("injected failure".to_string()));
        }
        state.next_id += 1;
        let window = HeadlessWindow { id: state.next_id };
        state.alive.insert(window);
        state.events.push(WindowEvent::Create(window, geometry));
        Ok(window)
    }

    fn map(&self, window: &HeadlessWindow) {
        let mut state = lock(&self.state);
        state.mapped.insert(*window);
        state.events.push(WindowEvent::Map(*window));
    }

    fn unmap(&self, window: &HeadlessWindow) {
        let mut state = lock(&self.state);
        state.mapped.remove(window);
        state.events.push(WindowEvent::Unmap(*window));
    }

    fn request_redraw(&self, window: &HeadlessWindow) {
        lock(&self.state).events.push(WindowEvent::Expose(*window));
    }

    fn destroy(&self, window: HeadlessWindow) {
        let mut state = lock(&self.state);
        state.mapped.remove(&window);
        state.alive.remove(&window);
        state.events.push(WindowEvent::Destroy(window));
    }
}

/// Terminal stand-in that records each flushed write as one chunk.
pub struct CaptureWriter {
    pending: Vec<u8>,
    captured: Captured,
}

/// Read side of a `CaptureWriter`
#[derive(Clone, Default)]
pub struct Captured {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    writes: Arc<AtomicU64>,
}

impl CaptureWriter {
    pub fn new() -> (Self, Captured) {
        let captured = Captured::default();
        let writer = Self {
            pending: Vec::new(),
            captured: captured.clone(),
        };
        (writer, captured)
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.captured.writes.fetch_add(1, Ordering::Relaxed);
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            lock(&self.captured.chunks).push(std::mem::take(&mut self.pending));
        }
        Ok(())
    }
}

impl Captured {
    /// Flushed chunks, oldest first.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        lock(&self.chunks).clone()
    }

    /// Every flushed byte in order.
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.chunks).concat()
    }

    /// `write` calls made, flushed or not.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
