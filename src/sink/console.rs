//! Console sink: unbuffered writes to standard error.

use std::io::Write;

use crate::error::{LogError, Result};

/// Writes rendered lines straight to stderr. No buffering, so interleaved
/// process output stays ordered.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> ConsoleSink {
        ConsoleSink
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        handle
            .write_all(bytes)
            .map_err(|e| LogError::sink_io(name, e))
    }

    pub fn flush(&self, name: &str) -> Result<()> {
        std::io::stderr()
            .flush()
            .map_err(|e| LogError::sink_io(name, e))
    }
}
