use std::io;

use thiserror::Error;

use super::scale::{fit_within, resize};
use super::{Frame, PixelLayout, PixelSource};

/// Failure to decode one unit of a stream
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Corrupt frame: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream cannot be rewound")]
    NotSeekable,
}

/// External decoder feeding a `VideoStream`.
pub trait FrameDecoder: Send {
    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn decode_next(&mut self) -> Result<Option<Frame>, DecodeError>;

    /// Native frame rate in frames per second.
    fn framerate(&self) -> u32;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<(), DecodeError> {
        Err(DecodeError::NotSeekable)
    }
}

/// Reject decoder output whose buffer does not match its dimensions.
fn checked(frame: Frame) -> Result<Frame, DecodeError> {
    if frame.is_well_formed() {
        Ok(frame)
    } else {
        Err(DecodeError::Corrupt(format!(
            "{}x{} {:?} frame with {} bytes",
            frame.width,
            frame.height,
            frame.layout,
            frame.data.len()
        )))
    }
}

/// Pre-decoded frames played back in order.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Frame>,
    fps: u32,
    position: usize,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>, fps: u32) -> Self {
        Self {
            frames,
            fps,
            position: 0,
        }
    }
}

impl FrameDecoder for FrameSequence {
    fn decode_next(&mut self) -> Result<Option<Frame>, DecodeError> {
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn framerate(&self) -> u32 {
        self.fps
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.position = 0;
        Ok(())
    }
}

/// A streaming source that advances one decoded frame per `next_frame()`.
///
/// The output size is fitted once from the first frame; every later frame is
/// resampled to that size and converted to the first frame's layout. When
/// decoding fails the previous snapshot is kept untouched.
pub struct VideoStream<D: FrameDecoder> {
    decoder: D,
    frame: Frame,
    looping: bool,
    decode_failures: u64,
}

impl<D: FrameDecoder> VideoStream<D> {
    /// Open a stream, decoding its first frame.
    pub fn new(
        mut decoder: D,
        max_width: u32,
        max_height: u32,
        looping: bool,
    ) -> Result<Self, DecodeError> {
        let first = decoder
            .decode_next()?
            .ok_or_else(|| DecodeError::Corrupt("stream has no frames".to_string()))
            .and_then(checked)?;
        let (width, height) = fit_within(first.width, first.height, max_width, max_height);
        let frame = resize(&first, width, height);
        tracing::debug!(
            "Opened stream {}x{} -> {}x{} at {} fps",
            first.width,
            first.height,
            width,
            height,
            decoder.framerate()
        );
        Ok(Self {
            decoder,
            frame,
            looping,
            decode_failures: 0,
        })
    }

    /// Number of `next_frame()` calls that kept the previous frame due to an error.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        let decoded = match self.decoder.decode_next()? {
            Some(frame) => Some(frame),
            None if self.looping => {
                self.decoder.rewind()?;
                self.decoder.decode_next()?
            },
            None => None,
        };
        decoded.map(checked).transpose()
    }

    fn accept(&mut self, decoded: Frame) {
        let fitted = resize(&decoded, self.frame.width, self.frame.height);
        self.frame = fitted.to_layout(self.frame.layout);
    }
}

impl<D: FrameDecoder> PixelSource for VideoStream<D> {
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

    fn framerate(&self) -> u32 {
        self.decoder.framerate()
    }

    fn next_frame(&mut self) {
        match self.decode() {
            Ok(Some(frame)) => self.accept(frame),
            Ok(None) => {},
            Err(e) => {
                self.decode_failures += 1;
                tracing::warn!("Keeping previous frame after decode failure: {}", e);
            },
        }
    }
}
