//! Colour quantization for sixel output
//!
//! Frames with few distinct colours keep them exactly. Larger palettes are
//! mapped onto a uniform colour cube sized to the register budget, with
//! optional Floyd-Steinberg error diffusion.

use std::collections::HashMap;

use crate::image::FrameView;

/// Alpha below this is left unpainted
const ALPHA_THRESHOLD: u8 = 128;

/// A frame reduced to palette indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    pub width: u32,
    pub height: u32,
    pub palette: Vec<[u8; 3]>,
    /// One entry per pixel, `None` for transparent pixels
    pub pixels: Vec<Option<u8>>,
}

impl IndexedImage {
    pub fn index_at(&self, x: u32, y: u32) -> Option<u8> {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Reduce `frame` to at most `max_colors` palette entries.
pub fn quantize(frame: FrameView<'_>, max_colors: usize, dither: bool) -> IndexedImage {
    let max_colors = max_colors.clamp(2, 256);
    match exact_palette(frame, max_colors) {
        Some(image) => image,
        None => cube_palette(frame, max_colors, dither),
    }
}

fn opaque(rgba: [u8; 4]) -> Option<[u8; 3]> {
    (rgba[3] >= ALPHA_THRESHOLD).then_some([rgba[0], rgba[1], rgba[2]])
}

/// Palette of the frame's own colours, if there are few enough of them.
fn exact_palette(frame: FrameView<'_>, max_colors: usize) -> Option<IndexedImage> {
    let mut lookup: HashMap<[u8; 3], u8> = HashMap::new();
    let mut palette = Vec::new();
    let mut pixels = Vec::with_capacity(frame.width as usize * frame.height as usize);

    for y in 0..frame.height {
        for x in 0..frame.width {
            let Some(rgb) = opaque(frame.rgba_at(x, y)) else {
                pixels.push(None);
                continue;
            };
            let index = match lookup.get(&rgb) {
                Some(&index) => index,
                None => {
                    if palette.len() == max_colors {
                        return None;
                    }
                    let index = palette.len() as u8;
                    palette.push(rgb);
                    lookup.insert(rgb, index);
                    index
                },
            };
            pixels.push(Some(index));
        }
    }

    Some(IndexedImage {
        width: frame.width,
        height: frame.height,
        palette,
        pixels,
    })
}

/// Levels per channel (r, g, b) for a cube of at most `max_colors` entries.
///
/// Green gets the extra level first, then red, then blue.
pub fn cube_levels(max_colors: usize) -> [usize; 3] {
    let mut base = 1;
    while (base + 1) * (base + 1) * (base + 1) <= max_colors {
        base += 1;
    }
    let mut levels = [base, base, base];
    for channel in [1, 0, 2] {
        levels[channel] += 1;
        if levels.iter().product::<usize>() > max_colors {
            levels[channel] -= 1;
            break;
        }
    }
    levels
}

fn level_value(level: usize, levels: usize) -> i32 {
    if levels == 1 {
        128
    } else {
        (level * 255 / (levels - 1)) as i32
    }
}

fn nearest_level(value: i32, levels: usize) -> usize {
    if levels == 1 {
        return 0;
    }
    let steps = (levels - 1) as i32;
    ((value.clamp(0, 255) * steps + 127) / 255) as usize
}

fn cube_palette(frame: FrameView<'_>, max_colors: usize, dither: bool) -> IndexedImage {
    let levels = cube_levels(max_colors);
    let mut palette = Vec::with_capacity(levels.iter().product());
    for r in 0..levels[0] {
        for g in 0..levels[1] {
            for b in 0..levels[2] {
                palette.push([
                    level_value(r, levels[0]) as u8,
                    level_value(g, levels[1]) as u8,
                    level_value(b, levels[2]) as u8,
                ]);
            }
        }
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut work: Vec<Option<[i32; 3]>> = Vec::with_capacity(width * height);
    for y in 0..frame.height {
        for x in 0..frame.width {
            work.push(opaque(frame.rgba_at(x, y)).map(|c| [c[0] as i32, c[1] as i32, c[2] as i32]));
        }
    }

    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let Some(color) = work[y * width + x] else {
                pixels.push(None);
                continue;
            };
            let idx = [0, 1, 2].map(|c| nearest_level(color[c], levels[c]));
            let index = (idx[0] * levels[1] + idx[1]) * levels[2] + idx[2];
            pixels.push(Some(index as u8));

            if dither {
                let chosen = palette[index];
                let error = [0, 1, 2].map(|c| color[c].clamp(0, 255) - chosen[c] as i32);
                diffuse(&mut work, width, height, x, y, error);
            }
        }
    }

    IndexedImage {
        width: frame.width,
        height: frame.height,
        palette,
        pixels,
    }
}

/// Floyd-Steinberg: 7/16 right, 3/16 down-left, 5/16 down, 1/16 down-right.
fn diffuse(
    work: &mut [Option<[i32; 3]>],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    error: [i32; 3],
) {
    let mut spread = |dx: isize, dy: usize, weight: i32| {
        let nx = x as isize + dx;
        let ny = y + dy;
        if nx < 0 || nx as usize >= width || ny >= height {
            return;
        }
        if let Some(color) = work[ny * width + nx as usize].as_mut() {
            for c in 0..3 {
                color[c] += error[c] * weight / 16;
            }
        }
    };
    spread(1, 0, 7);
    spread(-1, 1, 3);
    spread(0, 1, 5);
    spread(1, 1, 1);
}
