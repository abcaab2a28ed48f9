use super::scale::fit_frame;
use super::{Frame, PixelLayout, PixelSource};

/// A single decoded image.
#[derive(Debug, Clone)]
pub struct StillImage {
    frame: Frame,
}

impl StillImage {
    /// Wrap a decoded frame, shrinking it to fit within the limits once.
    pub fn new(frame: Frame, max_width: u32, max_height: u32) -> Self {
        let original = (frame.width, frame.height);
        let frame = fit_frame(frame, max_width, max_height);
        if original != (frame.width, frame.height) {
            tracing::debug!(
                "Scaled still image from {}x{} to {}x{}",
                original.0,
                original.1,
                frame.width,
                frame.height
            );
        }
        Self { frame }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl PixelSource for StillImage {
    fn width(&self) -> u32 {
        self.frame.width
    }

    fn height(&self) -> u32 {
        self.frame.height
    }

    fn layout(&self) -> PixelLayout {
        self.frame.layout
    }

    fn data(&self) -> &[u8] {
        &self.frame.data
    }
}
