//! Stream compression for rotated log files.
//!
//! Selectable codecs: gzip (DEFLATE-compatible container), zlib-wrapped,
//! raw deflate, zstd, and a byte-run RLE fast path for cheap archival. A
//! CRC32 over the original bytes travels with every result and is checked on
//! decompression; a mismatch surfaces as a corruption error.
//!
//! File compression can run inline or be handed to the thread pool with
//! `background=true`, returning a waitable handle. Callbacks fire on start,
//! success, error, and archive-delete events. The source file is never
//! deleted on failure, regardless of `keep_original`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use parking_lot::{Condvar, Mutex};

use crate::config::CompressionConfig;
use crate::error::{LogError, Result};
use crate::pool::{Priority, ThreadPool};

/// Codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// DEFLATE in a gzip container.
    Gzip,
    /// DEFLATE with a zlib wrapper.
    Zlib,
    /// Raw DEFLATE, no container.
    Deflate,
    /// Zstandard.
    Zstd,
    /// Byte-run encoding; fastest, worst ratio.
    Rle,
}

impl Algorithm {
    /// Parses a codec name (case-insensitive).
    pub fn from_str(s: &str) -> Result<Algorithm> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Algorithm::Gzip),
            "zlib" => Ok(Algorithm::Zlib),
            "deflate" | "raw" => Ok(Algorithm::Deflate),
            "zstd" | "zst" => Ok(Algorithm::Zstd),
            "rle" => Ok(Algorithm::Rle),
            other => Err(LogError::Configuration(format!(
                "invalid compression algorithm: '{}'",
                other
            ))),
        }
    }
}

/// Speed/ratio tradeoff, mapped per codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fast,
    #[default]
    Default,
    Best,
}

impl CompressionLevel {
    fn flate2(self) -> Compression {
        match self {
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Best => Compression::best(),
        }
    }

    fn zstd(self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Default => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Outcome of a file compression.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub source: PathBuf,
    pub output: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
    /// CRC32 over the original bytes.
    pub crc32: u32,
    pub elapsed: Duration,
    /// Whether the source file was removed after success.
    pub original_deleted: bool,
}

/// CRC32 (IEEE) over a byte slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(bytes);
    crc.sum()
}

/// A codec: algorithm plus level.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub algorithm: Algorithm,
    pub level: CompressionLevel,
}

impl Codec {
    pub fn new(algorithm: Algorithm, level: CompressionLevel) -> Codec {
        Codec { algorithm, level }
    }

    /// Compresses a byte slice.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut reader = input;
        self.compress_stream(&mut reader, &mut out)?;
        Ok(out)
    }

    /// Decompresses a byte slice. When `expected_crc` is given, the CRC32 of
    /// the recovered bytes is checked and a mismatch is a corruption error.
    pub fn decompress(&self, input: &[u8], expected_crc: Option<u32>) -> Result<Vec<u8>> {
        let out = match self.algorithm {
            Algorithm::Gzip => {
                let mut decoder = GzDecoder::new(input);
                read_all(&mut decoder)?
            }
            Algorithm::Zlib => {
                let mut decoder = ZlibDecoder::new(input);
                read_all(&mut decoder)?
            }
            Algorithm::Deflate => {
                let mut decoder = DeflateDecoder::new(input);
                read_all(&mut decoder)?
            }
            Algorithm::Zstd => zstd::decode_all(input)
                .map_err(|e| LogError::Compression(format!("zstd decode: {}", e)))?,
            Algorithm::Rle => rle_decode(input)?,
        };
        if let Some(expected) = expected_crc {
            let actual = crc32(&out);
            if actual != expected {
                return Err(LogError::Compression(format!(
                    "CRC mismatch: expected {:08x}, got {:08x}",
                    expected, actual
                )));
            }
        }
        Ok(out)
    }

    /// Streams `reader` into `writer` through the codec. Returns
    /// `(bytes_read, bytes_written, crc32_of_input)`.
    pub fn compress_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<(u64, u64, u32)> {
        let mut crc = flate2::Crc::new();
        let mut read_total = 0u64;
        let mut counter = CountingWriter {
            inner: writer,
            written: 0,
        };
        {
            let mut sink: Box<dyn Write + '_> = match self.algorithm {
                Algorithm::Gzip => Box::new(GzEncoder::new(&mut counter, self.level.flate2())),
                Algorithm::Zlib => Box::new(ZlibEncoder::new(&mut counter, self.level.flate2())),
                Algorithm::Deflate => {
                    Box::new(DeflateEncoder::new(&mut counter, self.level.flate2()))
                }
                Algorithm::Zstd => Box::new(
                    zstd::stream::write::Encoder::new(&mut counter, self.level.zstd())
                        .map_err(|e| LogError::Compression(format!("zstd encoder: {}", e)))?
                        .auto_finish(),
                ),
                Algorithm::Rle => Box::new(RleEncoder { inner: &mut counter }),
            };
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader
                    .read(&mut buf)
                    .map_err(|e| LogError::Compression(format!("read: {}", e)))?;
                if n == 0 {
                    break;
                }
                crc.update(&buf[..n]);
                read_total += n as u64;
                sink.write_all(&buf[..n])
                    .map_err(|e| LogError::Compression(format!("write: {}", e)))?;
            }
            sink.flush()
                .map_err(|e| LogError::Compression(format!("flush: {}", e)))?;
            // Encoders finalize their container on drop.
        }
        Ok((read_total, counter.written, crc.sum()))
    }
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn read_all(reader: &mut dyn Read) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| LogError::Compression(format!("decode: {}", e)))?;
    Ok(out)
}

// PackBits-style byte runs: a control byte 0..=127 introduces a literal run
// of control+1 bytes; 129..=255 repeats the next byte 257-control times; 128
// is unused. Each write() chunk is encoded independently, so runs never span
// chunk boundaries.
struct RleEncoder<'a> {
    inner: &'a mut dyn Write,
}

impl Write for RleEncoder<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoded = rle_encode_chunk(buf);
        self.inner.write_all(&encoded)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn rle_encode_chunk(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 8);
    let mut i = 0;
    while i < input.len() {
        // Measure the run starting at i.
        let byte = input[i];
        let mut run = 1usize;
        while i + run < input.len() && input[i + run] == byte && run < 128 {
            run += 1;
        }
        if run >= 3 {
            out.push((257 - run) as u8);
            out.push(byte);
            i += run;
        } else {
            // Collect literals until the next run of >= 3 or 128 bytes.
            let start = i;
            let mut len = 0usize;
            while i < input.len() && len < 128 {
                let b = input[i];
                let mut ahead = 1;
                while i + ahead < input.len() && input[i + ahead] == b && ahead < 3 {
                    ahead += 1;
                }
                if ahead >= 3 {
                    break;
                }
                i += 1;
                len += 1;
            }
            out.push((len - 1) as u8);
            out.extend_from_slice(&input[start..start + len]);
        }
    }
    out
}

fn rle_decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut i = 0;
    while i < input.len() {
        let control = input[i];
        i += 1;
        if control == 128 {
            return Err(LogError::Compression("invalid RLE control byte".into()));
        }
        if control < 128 {
            let len = control as usize + 1;
            if i + len > input.len() {
                return Err(LogError::Compression("truncated RLE literal run".into()));
            }
            out.extend_from_slice(&input[i..i + len]);
            i += len;
        } else {
            if i >= input.len() {
                return Err(LogError::Compression("truncated RLE repeat run".into()));
            }
            let len = 257 - control as usize;
            let byte = input[i];
            i += 1;
            out.extend(std::iter::repeat_n(byte, len));
        }
    }
    Ok(out)
}

/// Callbacks fired around background file compression. All run on the pool
/// worker performing the job.
#[derive(Clone, Default)]
pub struct CompressionCallbacks {
    pub on_start: Option<Arc<dyn Fn(&Path) + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(&CompressionResult) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Path, &LogError) + Send + Sync>>,
    pub on_archive_delete: Option<Arc<dyn Fn(&Path) + Send + Sync>>,
}

/// Compresses `src` into `dst` (or `src` + `.<extension>` when `dst` is
/// `None`), streaming through the configured codec.
///
/// On success the source is deleted unless `keep_original`; on any failure
/// the source is left untouched and the partial output is removed.
pub fn compress_file(
    src: &Path,
    dst: Option<&Path>,
    config: &CompressionConfig,
    callbacks: &CompressionCallbacks,
) -> Result<CompressionResult> {
    if let Some(cb) = &callbacks.on_start {
        cb(src);
    }
    let result = compress_file_inner(src, dst, config, callbacks);
    match &result {
        Ok(res) => {
            if let Some(cb) = &callbacks.on_success {
                cb(res);
            }
        }
        Err(err) => {
            if let Some(cb) = &callbacks.on_error {
                cb(src, err);
            }
        }
    }
    result
}

fn compress_file_inner(
    src: &Path,
    dst: Option<&Path>,
    config: &CompressionConfig,
    callbacks: &CompressionCallbacks,
) -> Result<CompressionResult> {
    let started = Instant::now();
    let output = match dst {
        Some(p) => p.to_path_buf(),
        None => {
            let mut name = src
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("archive")
                .to_string();
            name.push('.');
            name.push_str(&config.extension);
            src.with_file_name(name)
        }
    };
    let codec = Codec::new(config.algorithm, config.level);
    let mut reader =
        File::open(src).map_err(|e| LogError::Compression(format!("open {:?}: {}", src, e)))?;
    let mut writer = File::create(&output)
        .map_err(|e| LogError::Compression(format!("create {:?}: {}", output, e)))?;
    let stream = codec.compress_stream(&mut reader, &mut writer);
    let (read, written, crc) = match stream {
        Ok(triple) => triple,
        Err(err) => {
            drop(writer);
            let _ = std::fs::remove_file(&output);
            return Err(err);
        }
    };
    writer
        .sync_all()
        .map_err(|e| LogError::Compression(format!("sync {:?}: {}", output, e)))?;
    drop(writer);
    drop(reader);

    let mut original_deleted = false;
    if !config.keep_original {
        if std::fs::remove_file(src).is_ok() {
            original_deleted = true;
            if let Some(cb) = &callbacks.on_archive_delete {
                cb(src);
            }
        }
    }
    Ok(CompressionResult {
        source: src.to_path_buf(),
        output,
        original_size: read,
        compressed_size: written,
        crc32: crc,
        elapsed: started.elapsed(),
        original_deleted,
    })
}

struct HandleState {
    done: Mutex<Option<std::result::Result<CompressionResult, String>>>,
    cv: Condvar,
}

/// Waitable handle for a background compression job.
#[derive(Clone)]
pub struct CompressionHandle {
    state: Arc<HandleState>,
}

impl CompressionHandle {
    fn new() -> CompressionHandle {
        CompressionHandle {
            state: Arc::new(HandleState {
                done: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    fn complete(&self, result: Result<CompressionResult>) {
        let mut slot = self.state.done.lock();
        *slot = Some(result.map_err(|e| e.to_string()));
        self.state.cv.notify_all();
    }

    /// Blocks until the job finishes.
    pub fn wait(&self) -> Result<CompressionResult> {
        let mut slot = self.state.done.lock();
        while slot.is_none() {
            self.state.cv.wait(&mut slot);
        }
        slot.clone()
            .unwrap_or_else(|| Err("missing result".to_string()))
            .map_err(LogError::Compression)
    }

    /// Blocks up to `timeout`; `None` when the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<CompressionResult>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.done.lock();
        while slot.is_none() {
            if self.state.cv.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
            .map(|r| r.map_err(LogError::Compression))
    }
}

/// Enqueues `compress_file` on the pool and returns immediately.
pub fn compress_file_background(
    pool: &ThreadPool,
    src: PathBuf,
    dst: Option<PathBuf>,
    config: CompressionConfig,
    callbacks: CompressionCallbacks,
) -> Result<CompressionHandle> {
    let handle = CompressionHandle::new();
    let completion = handle.clone();
    pool.submit(Priority::Low, move || {
        let result = compress_file(&src, dst.as_deref(), &config, &callbacks);
        completion.complete(result);
    })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadPoolConfig;
    use tempfile::TempDir;

    const SAMPLE: &[u8] =
        b"2025-01-01 00:00:00 INFO starting\n2025-01-01 00:00:01 INFO started\naaaaaaaaaaaaaaaa\n";

    #[test]
    fn test_round_trip_all_algorithms() {
        for algorithm in [
            Algorithm::Gzip,
            Algorithm::Zlib,
            Algorithm::Deflate,
            Algorithm::Zstd,
            Algorithm::Rle,
        ] {
            let codec = Codec::new(algorithm, CompressionLevel::Default);
            let compressed = codec.compress(SAMPLE).unwrap();
            let expected = crc32(SAMPLE);
            let recovered = codec.decompress(&compressed, Some(expected)).unwrap();
            assert_eq!(recovered, SAMPLE, "round trip failed for {:?}", algorithm);
        }
    }

    #[test]
    fn test_crc_mismatch_is_corruption_error() {
        let codec = Codec::new(Algorithm::Gzip, CompressionLevel::Fast);
        let compressed = codec.compress(SAMPLE).unwrap();
        let err = codec.decompress(&compressed, Some(0xDEADBEEF)).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_rle_compresses_runs() {
        let input = vec![b'x'; 1000];
        let codec = Codec::new(Algorithm::Rle, CompressionLevel::Fast);
        let compressed = codec.compress(&input).unwrap();
        assert!(compressed.len() < input.len() / 10);
        assert_eq!(codec.decompress(&compressed, None).unwrap(), input);
    }

    #[test]
    fn test_rle_handles_literals_and_empty() {
        let codec = Codec::new(Algorithm::Rle, CompressionLevel::Fast);
        let input: Vec<u8> = (0u8..=255).collect();
        let compressed = codec.compress(&input).unwrap();
        assert_eq!(codec.decompress(&compressed, None).unwrap(), input);
        assert_eq!(codec.compress(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_level_mapping() {
        let codec_fast = Codec::new(Algorithm::Gzip, CompressionLevel::Fast);
        let codec_best = Codec::new(Algorithm::Gzip, CompressionLevel::Best);
        let input: Vec<u8> = SAMPLE.repeat(100);
        let fast = codec_fast.compress(&input).unwrap();
        let best = codec_best.compress(&input).unwrap();
        assert!(best.len() <= fast.len());
    }

    #[test]
    fn test_compress_file_deletes_original_by_default() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app.2025-01-01.log");
        std::fs::write(&src, SAMPLE).unwrap();

        let config = CompressionConfig::default();
        let result =
            compress_file(&src, None, &config, &CompressionCallbacks::default()).unwrap();
        assert_eq!(result.output, dir.path().join("app.2025-01-01.log.gz"));
        assert!(result.output.exists());
        assert!(!src.exists());
        assert!(result.original_deleted);
        assert_eq!(result.original_size, SAMPLE.len() as u64);
        assert_eq!(result.crc32, crc32(SAMPLE));
    }

    #[test]
    fn test_compress_file_keep_original() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("keep.log");
        std::fs::write(&src, SAMPLE).unwrap();
        let config = CompressionConfig {
            keep_original: true,
            ..Default::default()
        };
        let result =
            compress_file(&src, None, &config, &CompressionCallbacks::default()).unwrap();
        assert!(src.exists());
        assert!(!result.original_deleted);
    }

    #[test]
    fn test_compress_file_missing_source_keeps_nothing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("missing.log");
        let config = CompressionConfig::default();
        let err = compress_file(&src, None, &config, &CompressionCallbacks::default());
        assert!(err.is_err());
        assert!(!dir.path().join("missing.log.gz").exists());
    }

    #[test]
    fn test_compressed_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("verify.log");
        let payload: Vec<u8> = SAMPLE.repeat(50);
        std::fs::write(&src, &payload).unwrap();
        let config = CompressionConfig {
            keep_original: true,
            ..Default::default()
        };
        let result =
            compress_file(&src, None, &config, &CompressionCallbacks::default()).unwrap();
        let compressed = std::fs::read(&result.output).unwrap();
        let codec = Codec::new(Algorithm::Gzip, CompressionLevel::Default);
        let recovered = codec.decompress(&compressed, Some(result.crc32)).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_background_compression_fires_callbacks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bg.log");
        std::fs::write(&src, SAMPLE).unwrap();
        let pool = ThreadPool::new(&ThreadPoolConfig {
            workers: 1,
            ..Default::default()
        })
        .unwrap();

        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let succeeded = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let callbacks = CompressionCallbacks {
            on_start: Some({
                let started = Arc::clone(&started);
                Arc::new(move |_| started.store(true, std::sync::atomic::Ordering::Release))
            }),
            on_success: Some({
                let succeeded = Arc::clone(&succeeded);
                Arc::new(move |_| succeeded.store(true, std::sync::atomic::Ordering::Release))
            }),
            ..Default::default()
        };
        let handle = compress_file_background(
            &pool,
            src.clone(),
            None,
            CompressionConfig::default(),
            callbacks,
        )
        .unwrap();
        let result = handle.wait().unwrap();
        assert!(result.output.exists());
        assert!(started.load(std::sync::atomic::Ordering::Acquire));
        assert!(succeeded.load(std::sync::atomic::Ordering::Acquire));
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }
}
