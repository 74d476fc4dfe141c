//! Plain file sink with a buffered writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::WriteMode;
use crate::error::{LogError, Result};

pub(crate) fn open_log_file(path: &Path, mode: WriteMode) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match mode {
        WriteMode::Append => OpenOptions::new().create(true).append(true).open(path),
        WriteMode::Truncate => OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path),
    }
}

/// A single-file sink. Writes buffer through a `BufWriter` (8 KiB by
/// default); `flush` pushes everything to the OS and optionally fsyncs.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    fsync: bool,
}

impl FileSink {
    pub fn new(
        name: &str,
        path: PathBuf,
        mode: WriteMode,
        buffer_size: usize,
        fsync: bool,
    ) -> Result<FileSink> {
        let file = open_log_file(&path, mode).map_err(|e| LogError::sink_io(name, e))?;
        Ok(FileSink {
            path,
            writer: Mutex::new(BufWriter::with_capacity(buffer_size.max(1), file)),
            fsync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.writer
            .lock()
            .write_all(bytes)
            .map_err(|e| LogError::sink_io(name, e))
    }

    pub fn flush(&self, name: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush().map_err(|e| LogError::sink_io(name, e))?;
        if self.fsync {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| LogError::sink_io(name, e))?;
        }
        Ok(())
    }
}
