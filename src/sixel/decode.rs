//! Sixel decoding
//!
//! Reads a complete sixel sequence back into RGBA pixels. Used to check what
//! a window actually wrote to the terminal.

const COLOR_REGISTERS: usize = 256;
const MAX_DIMENSION: u32 = 4096;

/// A decoded sixel image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SixelImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SixelImage {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixels that received a colour (alpha set).
    pub fn painted(&self) -> usize {
        self.rgba.chunks_exact(4).filter(|px| px[3] != 0).count()
    }

    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.rgba[idx],
            self.rgba[idx + 1],
            self.rgba[idx + 2],
            self.rgba[idx + 3],
        ]
    }
}

/// A sixel image wrapped in cursor save, position and restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedImage {
    pub row: u16,
    pub col: u16,
    pub image: SixelImage,
}

/// Decode one complete sequence: `ESC P <params> q <data> ESC \`.
///
/// Returns `None` if the framing is incomplete or nothing was drawn.
pub fn decode(sequence: &[u8]) -> Option<SixelImage> {
    let body = sequence.strip_prefix(b"\x1bP")?;
    let body = body.strip_suffix(b"\x1b\\")?;
    let q = body.iter().position(|&b| b == b'q')?;
    if !body[..q].iter().all(|&b| b.is_ascii_digit() || b == b';') {
        return None;
    }
    let data = &body[q + 1..];
    if data.contains(&0x1b) {
        return None;
    }
    Decoder::new().run(data)
}

/// Parse one draw chunk: `ESC 7`, `ESC [ row ; col H`, a sixel sequence, `ESC 8`.
///
/// Anything before, after, or between those parts makes the chunk malformed.
pub fn parse_positioned(chunk: &[u8]) -> Option<PositionedImage> {
    let rest = chunk.strip_prefix(b"\x1b7")?;
    let rest = rest.strip_suffix(b"\x1b8")?;
    let rest = rest.strip_prefix(b"\x1b[")?;
    let h = rest.iter().position(|&b| b == b'H')?;
    let (row, col) = std::str::from_utf8(&rest[..h]).ok()?.split_once(';')?;
    let row = row.parse().ok()?;
    let col = col.parse().ok()?;
    let image = decode(&rest[h + 1..])?;
    Some(PositionedImage { row, col, image })
}

struct Decoder {
    colors: Vec<[u8; 3]>,
    current: usize,
    width: u32,
    height: u32,
    fixed_size: bool,
    rgba: Vec<u8>,
    x: u32,
    y: u32,
}

impl Decoder {
    fn new() -> Self {
        Self {
            colors: vec![[0, 0, 0]; COLOR_REGISTERS],
            current: 0,
            width: 0,
            height: 0,
            fixed_size: false,
            rgba: Vec::new(),
            x: 0,
            y: 0,
        }
    }

    fn run(mut self, data: &[u8]) -> Option<SixelImage> {
        let mut i = 0;
        while i < data.len() {
            match data[i] {
                b'"' => {
                    let (values, consumed) = parse_params(&data[i + 1..]);
                    i += 1 + consumed;
                    if let [_, _, w, h, ..] = values[..] {
                        if w > 0 && h > 0 {
                            self.width = w.min(MAX_DIMENSION);
                            self.height = h.min(MAX_DIMENSION);
                            self.fixed_size = true;
                            self.rgba = vec![0; (self.width * self.height * 4) as usize];
                        }
                    }
                },
                b'#' => {
                    let (values, consumed) = parse_params(&data[i + 1..]);
                    i += 1 + consumed;
                    self.select_or_define(&values);
                },
                b'!' => {
                    let (count, consumed) = parse_number(&data[i + 1..]);
                    i += 1 + consumed;
                    if let Some(&(ch @ 0x3F..=0x7E)) = data.get(i) {
                        for _ in 0..count {
                            self.paint(ch - 0x3F);
                        }
                        i += 1;
                    }
                },
                b'$' => {
                    self.x = 0;
                    i += 1;
                },
                b'-' => {
                    self.x = 0;
                    self.y += 6;
                    i += 1;
                },
                ch @ 0x3F..=0x7E => {
                    self.paint(ch - 0x3F);
                    i += 1;
                },
                _ => i += 1,
            }
        }

        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(SixelImage {
            width: self.width,
            height: self.height,
            rgba: self.rgba,
        })
    }

    fn select_or_define(&mut self, values: &[u32]) {
        match *values {
            [register, space, a, b, c] => {
                let Some(slot) = self.colors.get_mut(register as usize) else {
                    return;
                };
                match space {
                    2 => *slot = [a, b, c].map(|v| (v.min(100) * 255 / 100) as u8),
                    1 => *slot = hls_to_rgb(a, b, c),
                    _ => {},
                }
                self.current = register as usize;
            },
            [register, ..] => self.current = register as usize,
            [] => {},
        }
    }

    fn paint(&mut self, bits: u8) {
        if bits != 0 {
            self.grow(self.x + 1, self.y + 6);
            let color = self.colors.get(self.current).copied().unwrap_or_default();
            for bit in 0..6 {
                let py = self.y + bit;
                if bits & (1 << bit) == 0 || self.x >= self.width || py >= self.height {
                    continue;
                }
                let idx = ((py * self.width + self.x) * 4) as usize;
                self.rgba[idx..idx + 4].copy_from_slice(&[color[0], color[1], color[2], 255]);
            }
        }
        self.x += 1;
    }

    /// Enlarge an image with no raster attributes to cover `width x height`.
    fn grow(&mut self, width: u32, height: u32) {
        if self.fixed_size || (width <= self.width && height <= self.height) {
            return;
        }
        let new_w = self.width.max(width).min(MAX_DIMENSION);
        let new_h = self.height.max(height).min(MAX_DIMENSION);
        let mut pixels = vec![0u8; (new_w * new_h * 4) as usize];
        let row_len = (self.width * 4) as usize;
        for row in 0..self.height as usize {
            let src = row * row_len;
            let dst = row * (new_w * 4) as usize;
            pixels[dst..dst + row_len].copy_from_slice(&self.rgba[src..src + row_len]);
        }
        self.rgba = pixels;
        self.width = new_w;
        self.height = new_h;
    }
}

/// Semicolon separated numbers, returning the values and bytes consumed.
fn parse_params(data: &[u8]) -> (Vec<u32>, usize) {
    let mut values = Vec::new();
    let mut consumed = 0;
    loop {
        let (value, used) = parse_number(&data[consumed..]);
        if used == 0 && data.get(consumed) != Some(&b';') {
            break;
        }
        values.push(value);
        consumed += used;
        if data.get(consumed) == Some(&b';') {
            consumed += 1;
        } else {
            break;
        }
    }
    (values, consumed)
}

fn parse_number(data: &[u8]) -> (u32, usize) {
    let mut value: u32 = 0;
    let mut consumed = 0;
    for &byte in data {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add((byte - b'0') as u32);
        consumed += 1;
    }
    (value, consumed)
}

fn hls_to_rgb(h: u32, l: u32, s: u32) -> [u8; 3] {
    // Sixel HLS puts blue at 0 degrees, red at 120 and green at 240
    let h = ((h + 240) % 360) as f64;
    let l = l.min(100) as f64 / 100.0;
    let s = s.min(100) as f64 / 100.0;

    if s == 0.0 {
        let v = (l * 255.0) as u8;
        return [v, v, v];
    }

    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;

    [h + 120.0, h, h - 120.0]
        .map(|hue| hue_to_channel(m1, m2, hue))
        .map(|c| (c * 255.0).round() as u8)
}

fn hue_to_channel(m1: f64, m2: f64, mut h: f64) -> f64 {
    if h < 0.0 {
        h += 360.0;
    }
    if h > 360.0 {
        h -= 360.0;
    }

    if h < 60.0 {
        m1 + (m2 - m1) * h / 60.0
    } else if h < 180.0 {
        m2
    } else if h < 240.0 {
        m1 + (m2 - m1) * (240.0 - h) / 60.0
    } else {
        m1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(b"123abc"), (123, 3));
        assert_eq!(parse_number(b"abc"), (0, 0));
        assert_eq!(parse_number(b"0"), (0, 1));
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(b"1;1;64;32~"), (vec![1, 1, 64, 32], 9));
        assert_eq!(parse_params(b"5!"), (vec![5], 1));
        assert_eq!(parse_params(b";2"), (vec![0, 2], 2));
    }

    #[test]
    fn test_decode_raster_clips() {
        let image = decode(b"\x1bP0;1;0q\"1;1;3;4#1;2;0;100;0#1!3~\x1b\\").unwrap();
        assert_eq!((image.width, image.height), (3, 4));
        assert_eq!(image.painted(), 12);
        assert_eq!(image.rgba_at(2, 3), [0, 255, 0, 255]);
    }

    #[test]
    fn test_decode_grows_without_raster() {
        let image = decode(b"\x1bPq#0;2;100;0;0~~-~\x1b\\").unwrap();
        assert_eq!((image.width, image.height), (2, 12));
        assert_eq!(image.rgba_at(1, 11), [0, 0, 0, 0]);
        assert_eq!(image.rgba_at(0, 11), [255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_rejects_bad_framing() {
        assert!(decode(b"\x1bPq~~").is_none());
        assert!(decode(b"Pq~~\x1b\\").is_none());
        assert!(decode(b"\x1bPq\x1b\\").is_none());
        assert!(decode(b"\x1bPq~\x1b[1;1H~\x1b\\").is_none());
    }

    #[test]
    fn test_parse_positioned() {
        let chunk = b"\x1b7\x1b[2;5H\x1bPq#0;2;0;0;100!4~\x1b\\\x1b8";
        let parsed = parse_positioned(chunk).unwrap();
        assert_eq!((parsed.row, parsed.col), (2, 5));
        assert_eq!(parsed.image.width, 4);
        assert_eq!(parsed.image.rgba_at(3, 0), [0, 0, 255, 255]);

        assert!(parse_positioned(&chunk[..chunk.len() - 1]).is_none());
        assert!(parse_positioned(&chunk[2..]).is_none());
    }

    #[test]
    fn test_hls_to_rgb() {
        let [r, g, b] = hls_to_rgb(120, 50, 100);
        assert!(r > 200);
        assert!(g < 50);
        assert!(b < 50);
    }
}
