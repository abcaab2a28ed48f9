//! Pixel sources
//!
//! A pixel source hands decoded frames to the render windows. Decoding itself
//! belongs to an external collaborator; this module only holds the buffers,
//! fits them to a maximum size, and advances streaming sources.
//!
//! - `StillImage`: a single decoded frame
//! - `VideoStream`: frames pulled from a `FrameDecoder`, one per `next_frame()`

pub mod scale;
mod still;
mod stream;

pub use still::StillImage;
pub use stream::{DecodeError, FrameDecoder, FrameSequence, VideoStream};

use serde::{Deserialize, Serialize};

/// Byte order of a packed pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
    Bgra8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 | PixelLayout::Bgra8 => 4,
        }
    }
}

/// An owned, tightly packed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap a decoded buffer, checking it matches the declared dimensions.
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Option<Self> {
        let frame = Self {
            width,
            height,
            layout,
            data,
        };
        frame.is_well_formed().then_some(frame)
    }

    /// Non-empty, with exactly `width * height` pixels in the buffer.
    pub fn is_well_formed(&self) -> bool {
        let expected = self.width as usize * self.height as usize * self.layout.bytes_per_pixel();
        self.width != 0 && self.height != 0 && self.data.len() == expected
    }

    /// A frame filled with one RGBA colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            layout: PixelLayout::Rgba8,
            data,
        }
    }

    /// RGB test card: red across, green down, blue shifted by `phase`.
    pub fn gradient(width: u32, height: u32, phase: u8) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                let r = (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8;
                let g = (y * 255 / height.max(2).saturating_sub(1)).min(255) as u8;
                let b = ((x + y) as u8).wrapping_add(phase);
                data.extend_from_slice(&[r, g, b]);
            }
        }
        Self {
            width,
            height,
            layout: PixelLayout::Rgb8,
            data,
        }
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Borrowed view of this frame.
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data: &self.data,
        }
    }

    /// Pixel at (x, y) as RGBA. Out of range reads return transparent black.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        self.view().rgba_at(x, y)
    }

    /// Copy of this frame in another layout.
    pub fn to_layout(&self, layout: PixelLayout) -> Frame {
        if layout == self.layout {
            return self.clone();
        }
        Frame {
            width: self.width,
            height: self.height,
            layout,
            data: convert_layout(&self.data, self.layout, layout),
        }
    }
}

/// A borrowed frame, as read from a `PixelSource` without copying
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: &'a [u8],
}

impl FrameView<'_> {
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Pixel at (x, y) as RGBA. Out of range reads return transparent black.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.layout.bytes_per_pixel();
        let idx = y as usize * self.stride() + x as usize * bpp;
        if x >= self.width || y >= self.height || idx + bpp > self.data.len() {
            return [0, 0, 0, 0];
        }
        let px = &self.data[idx..idx + bpp];
        match self.layout {
            PixelLayout::Rgb8 => [px[0], px[1], px[2], 255],
            PixelLayout::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelLayout::Bgra8 => [px[2], px[1], px[0], px[3]],
        }
    }

    /// Owned copy of the viewed pixels.
    pub fn to_frame(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data: self.data.to_vec(),
        }
    }
}

/// Repack pixel bytes from one layout into another.
pub fn convert_layout(data: &[u8], from: PixelLayout, to: PixelLayout) -> Vec<u8> {
    if from == to {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len() / from.bytes_per_pixel() * to.bytes_per_pixel());
    match from {
        PixelLayout::Rgb8 => {
            for px in data.chunks_exact(3) {
                push_rgba(&mut out, [px[0], px[1], px[2], 255], to);
            }
        },
        PixelLayout::Rgba8 | PixelLayout::Bgra8 => {
            let pixels: &[[u8; 4]] = bytemuck::cast_slice(&data[..data.len() - data.len() % 4]);
            for &px in pixels {
                let rgba = if from == PixelLayout::Bgra8 {
                    [px[2], px[1], px[0], px[3]]
                } else {
                    px
                };
                push_rgba(&mut out, rgba, to);
            }
        },
    }
    out
}

fn push_rgba(out: &mut Vec<u8>, rgba: [u8; 4], to: PixelLayout) {
    match to {
        PixelLayout::Rgb8 => out.extend_from_slice(&rgba[..3]),
        PixelLayout::Rgba8 => out.extend_from_slice(&rgba),
        PixelLayout::Bgra8 => out.extend_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]),
    }
}

/// A producer of raw pixel frames.
///
/// `width`, `height`, `size`, `layout` and `data` always describe the same
/// snapshot. `next_frame` takes `&mut self`, so no reader can observe the
/// buffer while it is being replaced.
pub trait PixelSource: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layout(&self) -> PixelLayout;
    fn data(&self) -> &[u8];

    /// Byte length of the current snapshot.
    fn size(&self) -> usize {
        self.data().len()
    }

    /// Frames per second, 0 for still sources.
    fn framerate(&self) -> u32 {
        0
    }

    /// Advance to the next frame. Still sources ignore this.
    fn next_frame(&mut self) {}

    /// Borrowed view of the current snapshot.
    fn view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width(),
            height: self.height(),
            layout: self.layout(),
            data: self.data(),
        }
    }

    /// Owned copy of the current snapshot.
    fn snapshot(&self) -> Frame {
        self.view().to_frame()
    }
}

impl<T: PixelSource + ?Sized> PixelSource for Box<T> {
    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn layout(&self) -> PixelLayout {
        (**self).layout()
    }

    fn data(&self) -> &[u8] {
        (**self).data()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn framerate(&self) -> u32 {
        (**self).framerate()
    }

    fn next_frame(&mut self) {
        (**self).next_frame()
    }
}
