//! End-to-end tests for sixel windows writing to a shared terminal stream
//!
//! Every chunk the terminal receives must be one complete, positioned sixel
//! sequence, whatever the interleaving of windows and threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mochi_canvas::config::SixelConfig;
use mochi_canvas::headless::{CaptureWriter, Captured};
use mochi_canvas::image::{DecodeError, FrameDecoder, FrameSequence};
use mochi_canvas::sixel::parse_positioned;
use mochi_canvas::{
    Error, Frame, PixelLayout, PixelSource, RenderWindow, SharedOutput, SixelWindow, StillImage,
    VideoStream, WindowOptions,
};

fn capture() -> (SharedOutput, Captured) {
    let (writer, captured) = CaptureWriter::new();
    (SharedOutput::new(writer), captured)
}

fn sixel_window(output: &SharedOutput, source: Box<dyn PixelSource>, col: u16, row: u16) -> SixelWindow {
    SixelWindow::new(
        source,
        output.clone(),
        WindowOptions::at(col, row),
        SixelConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_interleaved_windows_never_split_sequences() {
    let (output, captured) = capture();
    let windows: Vec<Arc<SixelWindow>> = (0..4u16)
        .map(|i| {
            let frame = Frame::gradient(24 + i as u32 * 8, 18, i as u8 * 50);
            let source = Box::new(StillImage::new(frame, 0, 0));
            Arc::new(sixel_window(&output, source, i * 10, i))
        })
        .collect();

    let barrier = Arc::new(Barrier::new(windows.len()));
    let handles: Vec<_> = windows
        .iter()
        .map(|window| {
            let window = Arc::clone(window);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut drawn = 0;
                for _ in 0..10 {
                    window.generate_frame().unwrap();
                    window.draw().unwrap();
                    drawn += 1;
                }
                drawn
            })
        })
        .collect();
    let drawn: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let chunks = captured.chunks();
    assert_eq!(chunks.len(), drawn);
    for chunk in &chunks {
        let parsed = parse_positioned(chunk).expect("chunk is one positioned sequence");
        let index = parsed.row - 1;
        assert_eq!(parsed.col, index * 10 + 1);
        assert_eq!(parsed.image.width, 24 + index as u32 * 8);
        assert_eq!(parsed.image.height, 18);
    }
    // Nothing outside the chunks
    assert_eq!(captured.bytes().len(), chunks.iter().map(Vec::len).sum::<usize>());
}

#[test]
fn test_static_image_end_to_end() {
    let (output, captured) = capture();
    let source = StillImage::new(Frame::gradient(64, 64, 0), 128, 128);
    assert_eq!((source.width(), source.height()), (64, 64));

    let window = sixel_window(&output, Box::new(source), 0, 0);
    window.generate_frame().unwrap();
    window.draw().unwrap();

    let chunks = captured.chunks();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].starts_with(b"\x1b7\x1b[1;1H\x1bP"));
    let parsed = parse_positioned(&chunks[0]).unwrap();
    assert_eq!(parsed.image.pixel_count(), 64 * 64);
    assert_eq!(parsed.image.painted(), 64 * 64);
}

#[test]
fn test_hidden_window_writes_nothing() {
    let (output, captured) = capture();
    let window = sixel_window(
        &output,
        Box::new(StillImage::new(Frame::solid(8, 8, [0, 0, 0, 255]), 0, 0)),
        1,
        1,
    );
    window.generate_frame().unwrap();
    window.hide();
    window.hide();
    for _ in 0..5 {
        window.draw().unwrap();
    }
    assert_eq!(captured.writes(), 0);

    window.show();
    window.show();
    assert!(window.is_visible());
    window.draw().unwrap();
    assert_eq!(captured.chunks().len(), 1);
}

#[test]
fn test_draw_without_frame_is_misuse() {
    let (output, captured) = capture();
    let window = sixel_window(
        &output,
        Box::new(StillImage::new(Frame::solid(2, 2, [0, 0, 0, 255]), 0, 0)),
        0,
        0,
    );
    assert!(matches!(window.draw(), Err(Error::NoFrame)));
    assert!(captured.chunks().is_empty());
}

/// Source that records how many encodes read it at the same time.
struct Tracked {
    frame: Frame,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl PixelSource for Tracked {
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
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        self.active.fetch_sub(1, Ordering::SeqCst);
        &self.frame.data
    }
}

#[test]
fn test_overlapping_generate_is_serialised() {
    let (output, _captured) = capture();
    let peak = Arc::new(AtomicUsize::new(0));
    let tracked = Tracked {
        frame: Frame::gradient(32, 32, 0),
        active: Arc::new(AtomicUsize::new(0)),
        peak: Arc::clone(&peak),
    };
    let window = Arc::new(sixel_window(&output, Box::new(tracked), 0, 0));

    let calls = 8;
    let barrier = Arc::new(Barrier::new(calls));
    let handles: Vec<_> = (0..calls)
        .map(|_| {
            let window = Arc::clone(&window);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                window.generate_frame().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(window.encodes() >= 1);
    assert_eq!(window.encodes() + window.coalesced_encodes(), calls as u64);
}

/// Source whose pixel reads take a while, so encodes overlap.
struct Slow {
    frame: Frame,
    delay: Duration,
}

impl PixelSource for Slow {
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
        thread::sleep(self.delay);
        &self.frame.data
    }
}

#[test]
fn test_overlapping_generate_then_draw_shows_frame() {
    let (output, captured) = capture();
    let source = Slow {
        frame: Frame::gradient(20, 12, 0),
        delay: Duration::from_millis(300),
    };
    let window = Arc::new(sixel_window(&output, Box::new(source), 2, 0));

    let first = {
        let window = Arc::clone(&window);
        thread::spawn(move || window.generate_frame())
    };
    thread::sleep(Duration::from_millis(50));

    window.generate_frame().unwrap();
    window.draw().unwrap();
    first.join().unwrap().unwrap();

    assert_eq!(window.encodes(), 1);
    assert_eq!(window.coalesced_encodes(), 1);
    let chunks = captured.chunks();
    assert_eq!(chunks.len(), 1);
    let parsed = parse_positioned(&chunks[0]).unwrap();
    assert_eq!((parsed.image.width, parsed.image.height), (20, 12));
    assert_eq!(parsed.col, 3);
}

/// Decoder that fails every other frame after the first.
struct Unreliable {
    inner: FrameSequence,
    calls: usize,
}

impl FrameDecoder for Unreliable {
    fn decode_next(&mut self) -> Result<Option<Frame>, DecodeError> {
        self.calls += 1;
        if self.calls > 1 && self.calls % 2 == 0 {
            return Err(DecodeError::Corrupt("truncated packet".to_string()));
        }
        self.inner.decode_next()
    }

    fn framerate(&self) -> u32 {
        self.inner.framerate()
    }
}

#[test]
fn test_decode_failure_keeps_drawn_image() {
    let frames = (0..4).map(|i| Frame::gradient(16, 12, i * 60)).collect();
    let decoder = Unreliable {
        inner: FrameSequence::new(frames, 24),
        calls: 0,
    };
    let mut stream = VideoStream::new(decoder, 0, 0, false).unwrap();
    let before = stream.snapshot();

    stream.next_frame();
    assert_eq!(stream.decode_failures(), 1);
    assert_eq!(stream.snapshot(), before);

    // The frame that reaches the terminal is the one from before the failure
    let (output, captured) = capture();
    let window = sixel_window(&output, Box::new(stream), 0, 0);
    window.generate_frame().unwrap();
    window.draw().unwrap();
    let parsed = parse_positioned(&captured.chunks()[0]).unwrap();
    assert_eq!((parsed.image.width, parsed.image.height), (16, 12));
}
