//! Window registry
//!
//! The canvas keeps every live render window under the identifier the
//! controller gave it, and routes show/hide/expose requests to it.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::Result;
use crate::image::{Frame, PixelSource, StillImage};
use crate::output::SharedOutput;
use crate::window::{RenderWindow, SixelWindow};

pub struct Canvas {
    config: Config,
    output: SharedOutput,
    windows: HashMap<String, Box<dyn RenderWindow>>,
}

impl Canvas {
    pub fn new(config: Config, output: SharedOutput) -> Self {
        Self {
            config,
            output,
            windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output(&self) -> &SharedOutput {
        &self.output
    }

    /// Register `window` under `id`, dropping any window it replaces.
    pub fn add(&mut self, id: impl Into<String>, window: Box<dyn RenderWindow>) {
        let id = id.into();
        if self.windows.insert(id.clone(), window).is_some() {
            tracing::debug!("Replaced window {}", id);
        }
    }

    /// Create a sixel window for `source` at `col`/`row` and register it.
    ///
    /// The frame is generated immediately, so a following `draw` shows it.
    pub fn add_sixel(
        &mut self,
        id: impl Into<String>,
        source: Box<dyn PixelSource>,
        col: u16,
        row: u16,
    ) -> Result<()> {
        let window = SixelWindow::new(
            source,
            self.output.clone(),
            self.config.window_options(col, row),
            self.config.sixel,
        )?;
        window.generate_frame()?;
        self.add(id, Box::new(window));
        Ok(())
    }

    /// Fit a still frame to the configured maximum size and add it as a sixel window.
    pub fn add_still(
        &mut self,
        id: impl Into<String>,
        frame: Frame,
        col: u16,
        row: u16,
    ) -> Result<()> {
        let source = StillImage::new(frame, self.config.max_width, self.config.max_height);
        self.add_sixel(id, Box::new(source), col, row)
    }

    /// Remove and drop the window, waiting for its in-flight work.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.windows.remove(id).is_some();
        if !removed {
            tracing::debug!("No window {} to remove", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&dyn RenderWindow> {
        self.windows.get(id).map(|w| w.as_ref())
    }

    pub fn show(&self, id: &str) -> bool {
        self.get(id).map(|w| w.show()).is_some()
    }

    pub fn hide(&self, id: &str) -> bool {
        self.get(id).map(|w| w.hide()).is_some()
    }

    /// The windowing system reported `id` exposed; redraw its last frame.
    pub fn handle_expose(&self, id: &str) -> Result<()> {
        match self.get(id) {
            Some(window) => window.draw(),
            None => {
                tracing::debug!("Expose for unknown window {}", id);
                Ok(())
            },
        }
    }

    /// Generate and draw every window, returning the first failure.
    ///
    /// A failing window does not stop the others from rendering.
    pub fn render_all(&self) -> Result<()> {
        let mut first_error = None;
        for (id, window) in &self.windows {
            if let Err(e) = window.generate_frame().and_then(|_| window.draw()) {
                tracing::warn!("Window {} failed to render: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    /// Remove every window.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
