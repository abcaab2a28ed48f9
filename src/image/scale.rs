//! Scale-to-fit
//!
//! Frames larger than the configured maximum are shrunk, preserving aspect
//! ratio, so neither dimension exceeds the limit. Frames are never enlarged.

use super::Frame;

/// Size of a `width x height` image after fitting it into `max_width x max_height`.
///
/// A limit of 0 means unbounded in that dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let max_width = if max_width == 0 { u32::MAX } else { max_width };
    let max_height = if max_height == 0 { u32::MAX } else { max_height };

    if width <= max_width && height <= max_height {
        return (width, height);
    }

    // Compare width/max_width against height/max_height without floats.
    let width_bound = (width as u64) * (max_height as u64) >= (height as u64) * (max_width as u64);
    if width_bound {
        let new_height = (height as u64 * max_width as u64 / width as u64).max(1);
        (max_width, new_height as u32)
    } else {
        let new_width = (width as u64 * max_height as u64 / height as u64).max(1);
        (new_width as u32, max_height)
    }
}

/// Resample a frame to `width x height`.
///
/// Each destination pixel averages the block of source pixels it covers,
/// which degrades to nearest-neighbour sampling when enlarging.
pub fn resize(frame: &Frame, width: u32, height: u32) -> Frame {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }

    let bpp = frame.layout.bytes_per_pixel();
    let src_stride = frame.stride();
    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
    let mut sums = vec![0u64; bpp];

    for dy in 0..height as u64 {
        let y0 = dy * frame.height as u64 / height as u64;
        let y1 = ((dy + 1) * frame.height as u64 / height as u64).max(y0 + 1);
        for dx in 0..width as u64 {
            let x0 = dx * frame.width as u64 / width as u64;
            let x1 = ((dx + 1) * frame.width as u64 / width as u64).max(x0 + 1);

            sums.iter_mut().for_each(|s| *s = 0);
            for sy in y0..y1 {
                let row = sy as usize * src_stride;
                for sx in x0..x1 {
                    let idx = row + sx as usize * bpp;
                    for (sum, &byte) in sums.iter_mut().zip(&frame.data[idx..idx + bpp]) {
                        *sum += byte as u64;
                    }
                }
            }

            let count = (y1 - y0) * (x1 - x0);
            data.extend(sums.iter().map(|&s| ((s + count / 2) / count) as u8));
        }
    }

    Frame {
        width,
        height,
        layout: frame.layout,
        data,
    }
}

/// Fit a frame within the limits, resampling only when it is too large.
pub fn fit_frame(frame: Frame, max_width: u32, max_height: u32) -> Frame {
    let (width, height) = fit_within(frame.width, frame.height, max_width, max_height);
    if (width, height) == (frame.width, frame.height) {
        frame
    } else {
        resize(&frame, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelLayout;
    use proptest::prelude::*;

    #[test]
    fn test_fit_leaves_small_images_alone() {
        assert_eq!(fit_within(64, 64, 128, 128), (64, 64));
        assert_eq!(fit_within(128, 128, 128, 128), (128, 128));
        assert_eq!(fit_within(500, 20, 0, 0), (500, 20));
    }

    #[test]
    fn test_fit_preserves_aspect() {
        assert_eq!(fit_within(400, 200, 100, 100), (100, 50));
        assert_eq!(fit_within(200, 400, 100, 100), (50, 100));
        assert_eq!(fit_within(1920, 1080, 640, 0), (640, 360));
    }

    #[test]
    fn test_resize_averages_blocks() {
        // 2x2 checker of black and white averages to mid grey
        let data = vec![0, 0, 0, 255, 255, 255, 255, 255, 255, 0, 0, 0];
        let frame = Frame::new(2, 2, PixelLayout::Rgb8, data).unwrap();
        let small = resize(&frame, 1, 1);
        assert_eq!(small.data, vec![128, 128, 128]);
    }

    #[test]
    fn test_resize_enlarges_by_repetition() {
        let frame = Frame::new(1, 1, PixelLayout::Rgba8, vec![9, 8, 7, 6]).unwrap();
        let big = resize(&frame, 3, 2);
        assert_eq!(big.data.len(), 3 * 2 * 4);
        assert!(big.data.chunks_exact(4).all(|px| px == [9, 8, 7, 6]));
    }

    proptest! {
        #[test]
        fn prop_fit_never_exceeds_limits(
            w in 1u32..5000,
            h in 1u32..5000,
            mw in 1u32..2000,
            mh in 1u32..2000,
        ) {
            let (fw, fh) = fit_within(w, h, mw, mh);
            prop_assert!(fw <= mw && fh <= mh);
            prop_assert!(fw >= 1 && fh >= 1);
            prop_assert!(fw <= w && fh <= h);
        }

        #[test]
        fn prop_resized_buffer_matches_dimensions(
            w in 1u32..40,
            h in 1u32..40,
            tw in 1u32..40,
            th in 1u32..40,
        ) {
            let frame = Frame::solid(w, h, [10, 20, 30, 255]);
            let out = resize(&frame, tw, th);
            prop_assert_eq!(out.data.len(), (tw * th * 4) as usize);
            prop_assert!(out.data.chunks_exact(4).all(|px| px == [10, 20, 30, 255]));
        }
    }
}
