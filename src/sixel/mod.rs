//! Sixel wire format
//!
//! Encodes frames into DEC sixel device control strings, and wraps them with
//! the cursor save/position/restore bytes written for each draw. The decoder
//! reads those bytes back, which is how captured terminal output is checked.
//!
//! Reference: https://vt100.net/docs/vt3xx-gp/chapter14.html

mod decode;
pub mod palette;

pub use decode::{decode, parse_positioned, PositionedImage, SixelImage};

use crate::error::{Error, Result};
use crate::image::FrameView;
use palette::{quantize, IndexedImage};

/// DCS introducer: 1:1 aspect, transparent background
const DCS_START: &[u8] = b"\x1bP0;1;0q";
/// String terminator
const ST: &[u8] = b"\x1b\\";
/// DECSC / DECRC
const SAVE_CURSOR: &[u8] = b"\x1b7";
const RESTORE_CURSOR: &[u8] = b"\x1b8";
/// Runs at least this long are written with the repeat introducer
const MIN_REPEAT: usize = 4;

/// Quantizing sixel encoder
#[derive(Debug, Clone)]
pub struct SixelEncoder {
    max_colors: usize,
    dither: bool,
    /// Per-register column bits for the band being encoded
    band: Vec<Option<Vec<u8>>>,
}

impl SixelEncoder {
    pub fn new(max_colors: u16, dither: bool) -> Self {
        Self {
            max_colors: (max_colors as usize).clamp(2, 256),
            dither,
            band: Vec::new(),
        }
    }

    pub fn max_colors(&self) -> usize {
        self.max_colors
    }

    /// Encode one frame as a complete DCS sequence.
    pub fn encode(&mut self, frame: FrameView<'_>) -> Result<Vec<u8>> {
        let expected = frame.width as usize * frame.height as usize * frame.layout.bytes_per_pixel();
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::Encode("frame has no pixels".to_string()));
        }
        if frame.data.len() < expected {
            return Err(Error::Encode(format!(
                "buffer holds {} bytes, {}x{} needs {}",
                frame.data.len(),
                frame.width,
                frame.height,
                expected
            )));
        }

        let indexed = quantize(frame, self.max_colors, self.dither);
        Ok(self.encode_indexed(&indexed))
    }

    fn encode_indexed(&mut self, image: &IndexedImage) -> Vec<u8> {
        let width = image.width as usize;
        let mut out = Vec::with_capacity(width * image.height as usize / 2 + 64);

        out.extend_from_slice(DCS_START);
        out.extend_from_slice(format!("\"1;1;{};{}", image.width, image.height).as_bytes());
        for (index, &rgb) in image.palette.iter().enumerate() {
            let [r, g, b] = rgb.map(|c| (c as u32 * 100 + 127) / 255);
            out.extend_from_slice(format!("#{};2;{};{};{}", index, r, g, b).as_bytes());
        }

        self.band.clear();
        self.band.resize(image.palette.len(), None);

        let mut band_top = 0;
        while band_top < image.height {
            if band_top > 0 {
                out.push(b'-');
            }
            let rows = (image.height - band_top).min(6);
            for row in 0..rows {
                for x in 0..image.width {
                    if let Some(index) = image.index_at(x, band_top + row) {
                        let bits = self.band[index as usize].get_or_insert_with(|| vec![0; width]);
                        bits[x as usize] |= 1 << row;
                    }
                }
            }

            let mut first = true;
            for (index, slot) in self.band.iter_mut().enumerate() {
                let Some(bits) = slot.take() else {
                    continue;
                };
                if !first {
                    out.push(b'$');
                }
                first = false;
                out.extend_from_slice(format!("#{}", index).as_bytes());
                push_runs(&mut out, &bits);
            }
            band_top += 6;
        }

        out.extend_from_slice(ST);
        out
    }
}

/// Run-length encode one colour row of a band, dropping trailing blanks.
fn push_runs(out: &mut Vec<u8>, bits: &[u8]) {
    let end = bits.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let mut i = 0;
    while i < end {
        let value = bits[i];
        let run = bits[i..end].iter().take_while(|&&b| b == value).count();
        let ch = value + 0x3F;
        if run >= MIN_REPEAT {
            out.extend_from_slice(format!("!{}", run).as_bytes());
            out.push(ch);
        } else {
            out.extend(std::iter::repeat(ch).take(run));
        }
        i += run;
    }
}

/// Wrap a sixel payload so it is drawn at a 1-based terminal `row`/`col`.
///
/// The cursor is saved before and restored after, leaving the terminal's
/// own cursor where the user had it.
pub fn positioned(row: u16, col: u16, payload: &[u8]) -> Vec<u8> {
    let cup = format!("\x1b[{};{}H", row, col);
    let mut out =
        Vec::with_capacity(SAVE_CURSOR.len() + cup.len() + payload.len() + RESTORE_CURSOR.len());
    out.extend_from_slice(SAVE_CURSOR);
    out.extend_from_slice(cup.as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(RESTORE_CURSOR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Frame, PixelLayout};

    #[test]
    fn test_push_runs() {
        let mut out = Vec::new();
        push_runs(&mut out, &[1, 1, 1, 1, 1, 2, 0, 0]);
        assert_eq!(out, b"!5@A".to_vec());

        let mut out = Vec::new();
        push_runs(&mut out, &[0, 63, 63]);
        assert_eq!(out, b"?~~".to_vec());
    }

    #[test]
    fn test_encode_structure() {
        let frame = Frame::solid(4, 6, [255, 0, 0, 255]);
        let mut encoder = SixelEncoder::new(256, false);
        let bytes = encoder.encode(frame.view()).unwrap();
        assert!(bytes.starts_with(DCS_START));
        assert!(bytes.ends_with(ST));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"1;1;4;6"));
        assert!(text.contains("#0;2;100;0;0"));
        assert!(text.contains("#0!4~"));
        assert!(!text.contains('-'));
    }

    #[test]
    fn test_encode_multiple_bands() {
        let frame = Frame::solid(2, 13, [0, 0, 255, 255]);
        let bytes = SixelEncoder::new(256, false).encode(frame.view()).unwrap();
        let bands = bytes.iter().filter(|&&b| b == b'-').count();
        assert_eq!(bands, 2);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let view = FrameView {
            width: 4,
            height: 4,
            layout: PixelLayout::Rgb8,
            data: &[0; 10],
        };
        let err = SixelEncoder::new(256, false).encode(view).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn test_positioned_wrapping() {
        let bytes = positioned(3, 7, b"\x1bPq#0~\x1b\\");
        assert_eq!(bytes, b"\x1b7\x1b[3;7H\x1bPq#0~\x1b\\\x1b8".to_vec());
    }
}
