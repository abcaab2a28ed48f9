//! winit windowing for overlay windows
//!
//! winit only creates windows on the event loop thread. `WinitWindowing`
//! forwards creation to the loop as a user event and blocks for the reply;
//! the loop owner calls [`handle_request`] for every `OverlayRequest`.
//! Mapping, unmapping and redraw requests are issued directly.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::{EventLoopProxy, EventLoopWindowTarget};
use winit::window::{Window, WindowBuilder, WindowLevel};

use super::{OverlayGeometry, Windowing};
use crate::error::{Error, Result};
use crate::sync::lock;

/// Work the event loop thread performs for overlay windows
pub enum OverlayRequest {
    Create {
        geometry: OverlayGeometry,
        reply: mpsc::Sender<Result<Arc<Window>>>,
    },
    /// Leave the event loop
    Shutdown,
}

impl std::fmt::Debug for OverlayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayRequest::Create { geometry, .. } => {
                f.debug_struct("Create").field("geometry", geometry).finish()
            },
            OverlayRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}

pub struct WinitWindowing {
    proxy: Mutex<EventLoopProxy<OverlayRequest>>,
}

impl WinitWindowing {
    pub fn new(proxy: EventLoopProxy<OverlayRequest>) -> Self {
        Self {
            proxy: Mutex::new(proxy),
        }
    }

    /// Ask the event loop to exit once pending requests are handled.
    pub fn shutdown(&self) {
        if lock(&self.proxy).send_event(OverlayRequest::Shutdown).is_err() {
            tracing::debug!("Event loop already exited");
        }
    }
}

/// Build the window for `request`. Must run on the event loop thread.
///
/// With `parent` set, the overlay is embedded in that native window so it
/// moves with the terminal; otherwise it floats above other windows.
pub fn handle_request(
    target: &EventLoopWindowTarget<OverlayRequest>,
    request: OverlayRequest,
    parent: Option<u64>,
) {
    match request {
        OverlayRequest::Create { geometry, reply } => {
            let built = build_overlay(target, geometry, parent);
            if reply.send(built).is_err() {
                tracing::warn!("Overlay requester went away before the window was built");
            }
        },
        OverlayRequest::Shutdown => target.exit(),
    }
}

fn build_overlay(
    target: &EventLoopWindowTarget<OverlayRequest>,
    geometry: OverlayGeometry,
    parent: Option<u64>,
) -> Result<Arc<Window>> {
    let mut builder = WindowBuilder::new()
        .with_title("mochi-canvas")
        .with_decorations(false)
        .with_resizable(false)
        .with_visible(false)
        .with_active(false)
        .with_transparent(true)
        .with_position(PhysicalPosition::new(geometry.x, geometry.y))
        .with_inner_size(PhysicalSize::new(geometry.width.max(1), geometry.height.max(1)));

    builder = match parent {
        Some(id) => {
            let handle = winit::raw_window_handle::XlibWindowHandle::new(id as std::os::raw::c_ulong);
            // SAFETY: the id names a live X11 window owned by the terminal
            // for as long as the overlay exists.
            unsafe { builder.with_parent_window(Some(handle.into())) }
        },
        None => builder.with_window_level(WindowLevel::AlwaysOnTop),
    };

    builder
        .build(target)
        .map(Arc::new)
        .map_err(|e| Error::WindowCreation(e.to_string()))
}

impl Windowing for WinitWindowing {
    type Window = Arc<Window>;

    fn create_overlay(&self, geometry: OverlayGeometry) -> Result<Arc<Window>> {
        let (reply, receive) = mpsc::channel();
        lock(&self.proxy)
            .send_event(OverlayRequest::Create { geometry, reply })
            .map_err(|_| Error::WindowCreation("event loop has exited".to_string()))?;
        receive
            .recv()
            .map_err(|_| Error::WindowCreation("event loop dropped the request".to_string()))?
    }

    fn map(&self, window: &Arc<Window>) {
        window.set_visible(true);
    }

    fn unmap(&self, window: &Arc<Window>) {
        window.set_visible(false);
    }

    fn request_redraw(&self, window: &Arc<Window>) {
        window.request_redraw();
    }

    fn destroy(&self, window: Arc<Window>) {
        tracing::debug!("Closing overlay window {:?}", window.id());
        drop(window);
    }
}
