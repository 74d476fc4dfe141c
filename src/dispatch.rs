//! Background drain worker for asynchronous logging.
//!
//! Producers enqueue admitted records into the ring buffer; a dedicated
//! worker drains batches, renders each record once per eligible sink into a
//! reusable scratch buffer, and writes inline or hands the fan-out to the
//! parallel sink writer. The worker wakes on a crossbeam signal channel or
//! every `flush_interval_ms`, whichever comes first, and drains the ring to
//! empty each pass so no entry outlives `max_latency_ms` plus one batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;

use crate::config::AsyncConfig;
use crate::error::{LogError, Result};
use crate::levels::LevelRegistry;
use crate::parallel::{ParallelSinkWriter, WriterHooks};
use crate::record::Record;
use crate::ring::{PushOutcome, RingBuffer};
use crate::sink::{Sink, WriteMeta};

/// A record plus its enqueue timestamp for latency accounting.
pub struct QueuedRecord {
    pub record: Record,
    pub queued_at: Instant,
}

/// Everything the drain worker needs to deliver a record.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub sinks: Arc<RwLock<Vec<Arc<Sink>>>>,
    pub registry: Arc<LevelRegistry>,
    pub color_display: bool,
    pub parallel: Option<Arc<ParallelSinkWriter>>,
    pub hooks: WriterHooks,
}

impl DispatchContext {
    /// Renders and delivers one record to every admitting sink. Returns the
    /// number of sinks targeted. Sink failures go through the error hook;
    /// they never propagate.
    pub fn dispatch(&self, record: &Record, scratch: &mut String) -> usize {
        let custom_style = self.registry.style_of(record.level);
        let meta = WriteMeta {
            level: record.level,
        };
        let sinks = self.sinks.read();
        let mut targeted = 0;
        let mut parallel_writes = Vec::new();
        for sink in sinks.iter() {
            if !sink.admits(record) {
                continue;
            }
            targeted += 1;
            let style = if sink.color_active(self.color_display) {
                sink.formatter().style_for(record, custom_style.as_deref())
            } else {
                None
            };
            scratch.clear();
            sink.formatter().render_into(record, style.as_deref(), scratch);
            match &self.parallel {
                Some(_) => {
                    parallel_writes.push((
                        Arc::clone(sink),
                        scratch.clone().into_bytes(),
                        meta,
                    ));
                }
                None => match sink.write(scratch.as_bytes(), &meta) {
                    Ok(Some(event)) => {
                        if let Some(on_rotation) = &self.hooks.on_rotation {
                            on_rotation(sink.name(), event);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        if let Some(on_error) = &self.hooks.on_error {
                            on_error(sink.name(), &err);
                        }
                    }
                },
            }
        }
        drop(sinks);
        if let Some(parallel) = &self.parallel {
            if !parallel_writes.is_empty() {
                parallel.write_record(parallel_writes);
            }
        }
        targeted
    }
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
    latency_ns: AtomicU64,
}

/// Point-in-time dispatcher statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchStats {
    pub records_queued: u64,
    pub records_written: u64,
    pub records_dropped: u64,
    pub batches: u64,
    pub cumulative_latency_ns: u64,
}

struct IdleSignal {
    lock: Mutex<()>,
    cv: Condvar,
    busy: AtomicBool,
}

/// Outcome of handing a record to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued, but the oldest pending record was evicted.
    QueuedEvictedOldest,
    /// Rejected under drop-newest.
    Dropped,
    /// The dispatcher is shutting down.
    Shutdown,
}

/// The bounded queue plus its drain worker.
pub struct AsyncDispatcher {
    ring: Arc<RingBuffer<QueuedRecord>>,
    wake: Sender<()>,
    counters: Arc<Counters>,
    idle: Arc<IdleSignal>,
    stopping: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncDispatcher {
    /// Validates the config and spawns the drain worker.
    pub(crate) fn start(config: AsyncConfig, context: DispatchContext) -> Result<AsyncDispatcher> {
        config.validate()?;
        let ring = Arc::new(RingBuffer::new(
            config.capacity,
            config.overflow,
            config.expand_ceiling,
        )?);
        let (wake, wake_rx) = bounded::<()>(1);
        let counters = Arc::new(Counters::default());
        let idle = Arc::new(IdleSignal {
            lock: Mutex::new(()),
            cv: Condvar::new(),
            busy: AtomicBool::new(false),
        });
        let stopping = Arc::new(AtomicBool::new(false));
        let halt = Arc::new(AtomicBool::new(false));

        let worker = {
            let ring = Arc::clone(&ring);
            let counters = Arc::clone(&counters);
            let idle = Arc::clone(&idle);
            let stopping = Arc::clone(&stopping);
            let halt = Arc::clone(&halt);
            std::thread::Builder::new()
                .name("blazelog-dispatch".to_string())
                .spawn(move || {
                    drain_loop(ring, wake_rx, config, context, counters, idle, stopping, halt)
                })
                .map_err(|e| {
                    LogError::Configuration(format!("failed to spawn dispatcher: {}", e))
                })?
        };

        Ok(AsyncDispatcher {
            ring,
            wake,
            counters,
            idle,
            stopping,
            halt,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueues one record; the overflow policy resolves a full ring.
    pub fn enqueue(&self, record: Record) -> EnqueueOutcome {
        if self.stopping.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::Shutdown;
        }
        let outcome = self.ring.push(QueuedRecord {
            record,
            queued_at: Instant::now(),
        });
        let mapped = match outcome {
            PushOutcome::Stored => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            PushOutcome::StoredEvictedOldest => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::QueuedEvictedOldest
            }
            PushOutcome::Rejected => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Dropped
            }
            PushOutcome::Shutdown => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Shutdown
            }
        };
        // A full wake channel means the worker is already signaled.
        let _ = self.wake.try_send(());
        mapped
    }

    /// Blocks until every queued record is delivered or the timeout lapses.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let _ = self.wake.try_send(());
        let deadline = Instant::now() + timeout;
        let mut guard = self.idle.lock.lock();
        loop {
            if self.ring.is_empty() && !self.idle.busy.load(Ordering::Acquire) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LogError::ShutdownTimeout("async dispatcher"));
            }
            self.idle
                .cv
                .wait_for(&mut guard, Duration::from_millis(5));
        }
    }

    /// Stops the worker: drains bounded by `timeout`, counts whatever is
    /// left as dropped, flushes nothing itself (the logger flushes sinks),
    /// and joins the thread.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.stopping.store(true, Ordering::Release);
        self.ring.shutdown();
        let drained = self.flush(timeout);
        if drained.is_err() {
            self.halt.store(true, Ordering::Release);
            let mut remaining = Vec::new();
            loop {
                remaining.clear();
                if self.ring.pop_batch(&mut remaining, 1024) == 0 {
                    break;
                }
                self.counters
                    .dropped
                    .fetch_add(remaining.len() as u64, Ordering::Relaxed);
            }
        }
        let _ = self.wake.try_send(());
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        drained
    }

    pub fn queue_len(&self) -> usize {
        self.ring.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            records_queued: self.counters.queued.load(Ordering::Relaxed),
            records_written: self.counters.written.load(Ordering::Relaxed),
            records_dropped: self.counters.dropped.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            cumulative_latency_ns: self.counters.latency_ns.load(Ordering::Relaxed),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn drain_loop(
    ring: Arc<RingBuffer<QueuedRecord>>,
    wake: Receiver<()>,
    config: AsyncConfig,
    context: DispatchContext,
    counters: Arc<Counters>,
    idle: Arc<IdleSignal>,
    stopping: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
) {
    let wait = Duration::from_millis(
        config
            .flush_interval_ms
            .min(config.max_latency_ms.unwrap_or(u64::MAX))
            .max(1),
    );
    let mut batch: Vec<QueuedRecord> = Vec::with_capacity(config.batch_size);
    let mut scratch = String::with_capacity(1024);

    loop {
        if halt.load(Ordering::Acquire) {
            break;
        }
        // Drain to empty before sleeping again.
        loop {
            batch.clear();
            if ring.pop_batch(&mut batch, config.batch_size) == 0 {
                break;
            }
            idle.busy.store(true, Ordering::Release);
            let now = Instant::now();
            for queued in batch.drain(..) {
                context.dispatch(&queued.record, &mut scratch);
                counters.written.fetch_add(1, Ordering::Relaxed);
                counters.latency_ns.fetch_add(
                    now.duration_since(queued.queued_at).as_nanos() as u64,
                    Ordering::Relaxed,
                );
            }
            counters.batches.fetch_add(1, Ordering::Relaxed);
            idle.busy.store(false, Ordering::Release);
            if halt.load(Ordering::Acquire) {
                break;
            }
        }

        // Rotation triggers that fired between writes (time-based).
        for sink in context.sinks.read().iter() {
            match sink.rotate_if_needed() {
                Ok(Some(event)) => {
                    if let Some(on_rotation) = &context.hooks.on_rotation {
                        on_rotation(sink.name(), event);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    if let Some(on_error) = &context.hooks.on_error {
                        on_error(sink.name(), &err);
                    }
                }
            }
        }

        {
            let _guard = idle.lock.lock();
            idle.cv.notify_all();
        }
        if stopping.load(Ordering::Acquire) && ring.is_empty() {
            break;
        }
        match wake.recv_timeout(wait) {
            Ok(()) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                // Dispatcher handle dropped: drain what is left and exit.
                batch.clear();
                while ring.pop_batch(&mut batch, config.batch_size) > 0 {
                    for queued in batch.drain(..) {
                        context.dispatch(&queued.record, &mut scratch);
                        counters.written.fetch_add(1, Ordering::Relaxed);
                    }
                }
                break;
            }
        }
    }
    {
        let _guard = idle.lock.lock();
        idle.cv.notify_all();
    }
}
