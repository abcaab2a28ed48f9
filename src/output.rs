//! Shared terminal output
//!
//! Every sixel window in the process writes to the same terminal stream.
//! `SharedOutput` is the one guard they all hold: a whole escape sequence is
//! written and flushed while the lock is held, so sequences from different
//! windows never interleave. Cloning shares the guard; the stream is released
//! when the last clone is dropped.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::sync::lock;

#[derive(Clone)]
pub struct SharedOutput {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedOutput {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Guard over the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write `bytes` as one unit and flush, blocking while another window writes.
    pub fn write_frame(&self, bytes: &[u8]) -> io::Result<()> {
        let mut out = lock(&self.inner);
        out.write_all(bytes)?;
        out.flush()
    }

    /// Number of windows (and other holders) sharing this guard.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles guard the same stream.
    pub fn same_stream(&self, other: &SharedOutput) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedOutput")
            .field("holders", &self.holders())
            .finish()
    }
}
