//! Rotating file sink: size/time triggered rollover, naming strategies,
//! retention, archiving, and compression handoff.
//!
//! Rotation is serialized against writers by the sink's state lock, so a
//! concurrent `write` never observes a closed or half-renamed handle. A
//! failed rename reverts to the pre-rotation state: the active file is
//! reopened and writing continues.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;

use crate::config::{NamingStrategy, RotationConfig, RotationInterval, WriteMode};
use crate::error::{LogError, Result};
use crate::sink::file::open_log_file;

/// What a completed rotation produced.
#[derive(Debug, Clone)]
pub struct RotationEvent {
    /// Final resting place of the rotated file (inside the archive
    /// directory when one is configured).
    pub rotated_path: PathBuf,
    /// Set when the rotated file should be handed to compression.
    pub compress: Option<PathBuf>,
}

struct RotationState {
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    opened_at: DateTime<Utc>,
    period: String,
    index: u64,
}

/// A file sink that rolls the active file over on size and/or wall-clock
/// boundaries.
pub struct RotatingFileSink {
    path: PathBuf,
    config: RotationConfig,
    write_mode: WriteMode,
    buffer_size: usize,
    fsync: bool,
    state: Mutex<RotationState>,
}

fn period_token(interval: RotationInterval, now: &DateTime<Utc>) -> String {
    match interval {
        RotationInterval::Minutely => now.format("%Y-%m-%d_%H-%M").to_string(),
        RotationInterval::Hourly => now.format("%Y-%m-%d_%H").to_string(),
        RotationInterval::Daily => now.format("%Y-%m-%d").to_string(),
        RotationInterval::Weekly => format!("{}-W{:02}", now.iso_week().year(), now.iso_week().week()),
        RotationInterval::Monthly => now.format("%Y-%m").to_string(),
        RotationInterval::Yearly => now.format("%Y").to_string(),
    }
}

fn split_name(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("log")
        .to_string();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string());
    (stem, ext)
}

fn rotated_file_name(
    naming: &NamingStrategy,
    base: &Path,
    now: &DateTime<Utc>,
    index: u64,
) -> String {
    let (stem, ext) = split_name(base);
    let token = match naming {
        NamingStrategy::TimestampMs => now.timestamp_millis().to_string(),
        NamingStrategy::Date => now.format("%Y-%m-%d").to_string(),
        NamingStrategy::IsoDateTime => now.format("%Y-%m-%dT%H-%M-%S").to_string(),
        NamingStrategy::Index => (index + 1).to_string(),
        NamingStrategy::Template(template) => {
            return template
                .replace("{base}", &stem)
                .replace("{ext}", ext.as_deref().unwrap_or(""))
                .replace("{date}", &now.format("%Y-%m-%d").to_string())
                .replace("{time}", &now.format("%H-%M-%S").to_string())
                .replace("{iso}", &now.format("%Y-%m-%dT%H-%M-%S").to_string())
                .replace("{YYYY}", &now.format("%Y").to_string())
                .replace("{MM}", &now.format("%m").to_string())
                .replace("{DD}", &now.format("%d").to_string())
                .replace("{HH}", &now.format("%H").to_string())
                .replace("{mm}", &now.format("%M").to_string())
                .replace("{ss}", &now.format("%S").to_string());
        }
    };
    match ext {
        Some(ext) => format!("{}.{}.{}", stem, token, ext),
        None => format!("{}.{}", stem, token),
    }
}

/// Appends `-N` before the extension until the path is free, so rapid
/// rotations under the same name token never clobber each other.
fn unique_path(candidate: PathBuf) -> PathBuf {
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = split_name(&candidate);
    for n in 1u32.. {
        let name = match &ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        let next = candidate.with_file_name(name);
        if !next.exists() {
            return next;
        }
    }
    candidate
}

impl RotatingFileSink {
    pub fn new(
        name: &str,
        path: PathBuf,
        config: RotationConfig,
        write_mode: WriteMode,
        buffer_size: usize,
        fsync: bool,
    ) -> Result<RotatingFileSink> {
        config.validate()?;
        let file = open_log_file(&path, write_mode).map_err(|e| LogError::sink_io(name, e))?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        let now = Utc::now();
        let period = config
            .interval
            .map(|interval| period_token(interval, &now))
            .unwrap_or_default();
        Ok(RotatingFileSink {
            path,
            config,
            write_mode,
            buffer_size: buffer_size.max(1),
            fsync,
            state: Mutex::new(RotationState {
                writer: Some(BufWriter::with_capacity(buffer_size.max(1), file)),
                bytes_written,
                opened_at: now,
                period,
                index: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression_config(&self) -> &crate::config::CompressionConfig {
        &self.config.compression
    }

    /// Writes a rendered record, rotating first when this write would cross
    /// the size limit or the wall clock crossed an interval boundary.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<Option<RotationEvent>> {
        let mut state = self.state.lock();
        let mut event = None;
        if self.rotation_due(&state, bytes.len() as u64) {
            event = Some(self.rotate_locked(name, &mut state)?);
        }
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| LogError::rotation(name, "active file handle missing"))?;
        writer
            .write_all(bytes)
            .map_err(|e| LogError::sink_io(name, e))?;
        state.bytes_written += bytes.len() as u64;
        Ok(event)
    }

    pub fn flush(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.as_mut() {
            writer.flush().map_err(|e| LogError::sink_io(name, e))?;
            if self.fsync {
                writer
                    .get_ref()
                    .sync_all()
                    .map_err(|e| LogError::sink_io(name, e))?;
            }
        }
        Ok(())
    }

    /// Rotates when a trigger is pending; used by the dispatcher between
    /// batches.
    pub fn rotate_if_needed(&self, name: &str) -> Result<Option<RotationEvent>> {
        let mut state = self.state.lock();
        if self.rotation_due(&state, 0) {
            return self.rotate_locked(name, &mut state).map(Some);
        }
        Ok(None)
    }

    /// Unconditional rotation; used by scheduled rotation tasks.
    pub fn force_rotate(&self, name: &str) -> Result<RotationEvent> {
        let mut state = self.state.lock();
        self.rotate_locked(name, &mut state)
    }

    fn rotation_due(&self, state: &RotationState, incoming: u64) -> bool {
        if let Some(limit) = self.config.size_limit {
            // Trigger on the write that crosses the limit, not the one that
            // lands exactly on it.
            if incoming > 0 && state.bytes_written + incoming > limit {
                return true;
            }
        }
        if let Some(interval) = self.config.interval {
            if period_token(interval, &Utc::now()) != state.period {
                return true;
            }
        }
        false
    }

    fn rotate_locked(&self, name: &str, state: &mut RotationState) -> Result<RotationEvent> {
        let now = Utc::now();

        // Flush and close the active file.
        if let Some(mut writer) = state.writer.take() {
            writer.flush().map_err(|e| LogError::sink_io(name, e))?;
            if self.fsync {
                let _ = writer.get_ref().sync_all();
            }
        }

        let rotated_name = rotated_file_name(&self.config.naming, &self.path, &now, state.index);
        let rotated_path = unique_path(self.path.with_file_name(rotated_name));

        if let Err(rename_err) = std::fs::rename(&self.path, &rotated_path) {
            // Revert: reopen the active file and keep writing to it.
            let file = open_log_file(&self.path, WriteMode::Append)
                .map_err(|e| LogError::sink_io(name, e))?;
            state.bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
            state.writer = Some(BufWriter::with_capacity(self.buffer_size, file));
            return Err(LogError::rotation(
                name,
                format!("rename to {:?} failed: {}", rotated_path, rename_err),
            ));
        }

        // Move into the archive directory when configured; a failed move
        // leaves the file beside the active one and rotation continues.
        let mut final_path = rotated_path;
        if let Some(archive_dir) = &self.config.archive_dir {
            if std::fs::create_dir_all(archive_dir).is_ok() {
                if let Some(file_name) = final_path.file_name() {
                    let archived = unique_path(archive_dir.join(file_name));
                    if std::fs::rename(&final_path, &archived).is_ok() {
                        final_path = archived;
                    }
                }
            }
        }

        // Fresh active file.
        let file =
            open_log_file(&self.path, self.write_mode).map_err(|e| LogError::sink_io(name, e))?;
        state.writer = Some(BufWriter::with_capacity(self.buffer_size, file));
        state.bytes_written = 0;
        state.opened_at = now;
        state.index += 1;
        if let Some(interval) = self.config.interval {
            state.period = period_token(interval, &now);
        }

        self.enforce_retention();

        let compress = self
            .config
            .compress_on_rotation
            .then(|| final_path.clone());
        Ok(RotationEvent {
            rotated_path: final_path,
            compress,
        })
    }

    // Deletes rotated files beyond retention_count and older than
    // max_age_seconds, newest (by mtime) kept first. Compressed rotations
    // count too. Removes an emptied archive directory when asked.
    fn enforce_retention(&self) {
        if self.config.retention_count.is_none() && self.config.max_age_seconds.is_none() {
            return;
        }
        let mut candidates = self.rotated_files();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut to_delete: Vec<PathBuf> = Vec::new();
        if let Some(keep) = self.config.retention_count {
            if candidates.len() > keep {
                to_delete.extend(candidates.split_off(keep).into_iter().map(|(_, p)| p));
            }
        }
        if let Some(max_age) = self.config.max_age_seconds {
            let cutoff = SystemTime::now() - std::time::Duration::from_secs(max_age);
            to_delete.extend(
                candidates
                    .into_iter()
                    .filter(|(mtime, _)| *mtime < cutoff)
                    .map(|(_, p)| p),
            );
        }
        for path in to_delete {
            let _ = std::fs::remove_file(path);
        }

        if self.config.clean_empty_dirs {
            if let Some(archive_dir) = &self.config.archive_dir {
                if std::fs::read_dir(archive_dir)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false)
                {
                    let _ = std::fs::remove_dir(archive_dir);
                }
            }
        }
    }

    fn rotated_files(&self) -> Vec<(SystemTime, PathBuf)> {
        let (stem, _) = split_name(&self.path);
        let prefix = format!("{}.", stem);
        let active_name = self.path.file_name().map(|n| n.to_os_string());
        let mut out = Vec::new();
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(parent) = self.path.parent() {
            dirs.push(parent.to_path_buf());
        }
        if let Some(archive_dir) = &self.config.archive_dir {
            dirs.push(archive_dir.clone());
        }
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if active_name.as_deref() == path.file_name() && Some(dir.as_path()) == self.path.parent()
                {
                    continue;
                }
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !file_name.starts_with(&prefix) {
                    continue;
                }
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                out.push((mtime, path));
            }
        }
        out
    }
}
