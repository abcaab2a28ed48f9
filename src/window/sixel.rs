//! Sixel render window
//!
//! Frames move through `Idle -> Encoding -> Ready -> Writing -> Idle`.
//! Encoding only reads the pixel source and may run alongside other windows'
//! encodes. Writing happens under the process-wide `SharedOutput` guard.
//! A worker thread per window drives animated sources and asynchronous
//! redraw requests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{OverlayGeometry, RenderWindow, WindowOptions};
use crate::config::SixelConfig;
use crate::error::{Error, Result};
use crate::image::PixelSource;
use crate::output::SharedOutput;
use crate::sixel::{positioned, SixelEncoder};
use crate::sync::lock;

/// Where a sixel window is in its frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SixelState {
    Idle = 0,
    Encoding = 1,
    Ready = 2,
    Writing = 3,
}

impl SixelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SixelState::Encoding,
            2 => SixelState::Ready,
            3 => SixelState::Writing,
            _ => SixelState::Idle,
        }
    }
}

/// Wakeups for the worker thread
struct Signal {
    redraw: Mutex<bool>,
    wake: Condvar,
}

/// Lets coalesced callers wait for the in-flight encode to settle
struct Settled {
    lock: Mutex<()>,
    done: Condvar,
}

struct Shared {
    source: Mutex<Box<dyn PixelSource>>,
    encoder: Mutex<SixelEncoder>,
    payload: Mutex<Option<Arc<Vec<u8>>>>,
    output: SharedOutput,
    state: AtomicU8,
    /// Set while an encode is in flight; a second request is coalesced
    encoding: AtomicBool,
    settled: Settled,
    /// Serialises draws of this window
    drawing: Mutex<()>,
    visible: AtomicBool,
    running: AtomicBool,
    signal: Signal,
    row: u16,
    col: u16,
    geometry: OverlayGeometry,
    encodes: AtomicU64,
    coalesced: AtomicU64,
    draws: AtomicU64,
}

/// Clears the encode flag when an encode finishes or fails, waking waiters.
struct EncodeGate<'a> {
    encoding: &'a AtomicBool,
    settled: &'a Settled,
}

impl Drop for EncodeGate<'_> {
    fn drop(&mut self) {
        let _settled = lock(&self.settled.lock);
        self.encoding.store(false, Ordering::Release);
        self.settled.done.notify_all();
    }
}

/// What to do when `generate_frame` finds an encode already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlap {
    /// Wait for it and share its result
    Wait,
    /// Return immediately
    Skip,
}

impl Shared {
    fn set_state(&self, state: SixelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn swap_state(&self, from: SixelState, to: SixelState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_begin_encode(&self) -> Option<EncodeGate<'_>> {
        self.encoding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EncodeGate {
                encoding: &self.encoding,
                settled: &self.settled,
            })
    }

    fn wait_for_encode(&self) {
        let mut settled = lock(&self.settled.lock);
        while self.encoding.load(Ordering::Acquire) {
            settled = self
                .settled
                .done
                .wait(settled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Encode the current source snapshot. Returns whether this call encoded.
    ///
    /// With `Overlap::Wait` a call that overlaps an in-flight encode blocks
    /// until it settles. If that encode succeeded the call shares its
    /// payload, otherwise it encodes on its own.
    fn generate_frame(&self, overlap: Overlap) -> Result<bool> {
        let _gate = loop {
            let finished = self.encodes.load(Ordering::Acquire);
            if let Some(gate) = self.try_begin_encode() {
                break gate;
            }
            if overlap == Overlap::Skip {
                tracing::trace!("Encode already in flight, skipping");
                return Ok(false);
            }
            self.wait_for_encode();
            if self.encodes.load(Ordering::Acquire) > finished {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Coalesced into the in-flight encode");
                return Ok(false);
            }
        };

        self.set_state(SixelState::Encoding);
        let encoded = {
            let source = lock(&self.source);
            lock(&self.encoder).encode(source.view())
        };

        match encoded {
            Ok(bytes) => {
                *lock(&self.payload) = Some(Arc::new(bytes));
                self.encodes.fetch_add(1, Ordering::AcqRel);
                self.set_state(SixelState::Ready);
                Ok(true)
            },
            Err(e) => {
                self.set_state(SixelState::Idle);
                Err(e)
            },
        }
    }

    fn draw(&self) -> Result<()> {
        if !self.visible.load(Ordering::Acquire) {
            return Ok(());
        }
        let _drawing = lock(&self.drawing);
        if lock(&self.payload).is_none() {
            return Err(Error::NoFrame);
        }

        // Mark before reading the payload so a frame that turns Ready after
        // this point is left Ready for the next draw. An encode in flight
        // keeps its state; the last finished payload is redrawn.
        let marked = self.swap_state(SixelState::Ready, SixelState::Writing)
            || self.swap_state(SixelState::Idle, SixelState::Writing);
        let payload = lock(&self.payload).clone().ok_or(Error::NoFrame)?;

        let chunk = positioned(self.row, self.col, &payload);
        let written = self.output.write_frame(&chunk);
        if marked {
            self.swap_state(SixelState::Writing, SixelState::Idle);
        }
        written?;
        self.draws.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn request_redraw(&self) {
        *lock(&self.signal.redraw) = true;
        self.signal.wake.notify_one();
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _redraw = lock(&self.signal.redraw);
        self.signal.wake.notify_all();
    }

    /// Block until a redraw is requested, the frame interval elapses, or the
    /// window stops. Returns whether the source should advance, or `None` on stop.
    fn wait(&self, interval: Option<Duration>) -> Option<bool> {
        let mut redraw = lock(&self.signal.redraw);
        loop {
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if *redraw {
                *redraw = false;
                return Some(false);
            }
            match interval {
                Some(interval) => {
                    let (guard, timeout) = self
                        .signal
                        .wake
                        .wait_timeout(redraw, interval)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    redraw = guard;
                    if timeout.timed_out() && self.running.load(Ordering::Acquire) {
                        return Some(true);
                    }
                },
                None => {
                    redraw = self
                        .signal
                        .wake
                        .wait(redraw)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                },
            }
        }
    }

    fn run_worker(&self) {
        let framerate = lock(&self.source).framerate();
        let interval = frame_interval(framerate);
        tracing::debug!("Sixel worker started at {:?} per frame", interval);

        while let Some(advance) = self.wait(interval) {
            if advance {
                lock(&self.source).next_frame();
            }
            // A timer tick that lands on a caller's encode is dropped
            let overlap = if advance { Overlap::Skip } else { Overlap::Wait };
            match self.generate_frame(overlap) {
                Ok(false) if overlap == Overlap::Skip => continue,
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!("Sixel encode failed: {}", e);
                    continue;
                },
            }
            if let Err(e) = self.draw() {
                tracing::warn!("Sixel write failed: {}", e);
            }
        }
        tracing::debug!("Sixel worker stopped");
    }
}

/// Time between animation frames, never below one millisecond. `None` for
/// still sources.
fn frame_interval(framerate: u32) -> Option<Duration> {
    (framerate > 0).then(|| Duration::from_millis((1000 / framerate as u64).max(1)))
}

/// A window drawn with sixel escape sequences on the shared terminal stream.
pub struct SixelWindow {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SixelWindow {
    /// Create the window and start its worker thread.
    pub fn new(
        source: Box<dyn PixelSource>,
        output: SharedOutput,
        options: WindowOptions,
        config: SixelConfig,
    ) -> Result<Self> {
        let geometry = options.geometry(source.width(), source.height());
        let shared = Arc::new(Shared {
            source: Mutex::new(source),
            encoder: Mutex::new(SixelEncoder::new(config.max_colors, config.dither)),
            payload: Mutex::new(None),
            output,
            state: AtomicU8::new(SixelState::Idle as u8),
            encoding: AtomicBool::new(false),
            settled: Settled {
                lock: Mutex::new(()),
                done: Condvar::new(),
            },
            drawing: Mutex::new(()),
            visible: AtomicBool::new(options.show_on_create),
            running: AtomicBool::new(true),
            signal: Signal {
                redraw: Mutex::new(false),
                wake: Condvar::new(),
            },
            // Terminal rows and columns are 1-based
            row: options.placement.row.saturating_add(1),
            col: options.placement.col.saturating_add(1),
            geometry,
            encodes: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            draws: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("sixel-{}-{}", options.placement.col, options.placement.row))
            .spawn(move || worker_shared.run_worker())?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Ask the worker to encode and draw a fresh frame without blocking.
    pub fn request_redraw(&self) {
        self.shared.request_redraw();
    }

    pub fn state(&self) -> SixelState {
        SixelState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Completed encodes.
    pub fn encodes(&self) -> u64 {
        self.shared.encodes.load(Ordering::Relaxed)
    }

    /// `generate_frame()` calls that shared the result of an encode already in flight.
    pub fn coalesced_encodes(&self) -> u64 {
        self.shared.coalesced.load(Ordering::Relaxed)
    }

    /// Escape sequences written to the terminal.
    pub fn draws(&self) -> u64 {
        self.shared.draws.load(Ordering::Relaxed)
    }
}

impl RenderWindow for SixelWindow {
    fn generate_frame(&self) -> Result<()> {
        self.shared.generate_frame(Overlap::Wait).map(|_| ())
    }

    fn draw(&self) -> Result<()> {
        self.shared.draw()
    }

    fn show(&self) {
        self.shared.visible.store(true, Ordering::Release);
    }

    fn hide(&self) {
        self.shared.visible.store(false, Ordering::Release);
    }

    fn is_visible(&self) -> bool {
        self.shared.visible.load(Ordering::Acquire)
    }

    fn geometry(&self) -> OverlayGeometry {
        self.shared.geometry
    }
}

impl Drop for SixelWindow {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Sixel worker panicked");
            }
        }
    }
}
