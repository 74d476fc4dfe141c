//! Fan-out of formatted records to many sinks through the thread pool.
//!
//! Every sink owns a serial queue of pending writes drained by at most one
//! pool task at a time, which preserves per-sink FIFO order; cross-sink
//! ordering is unspecified. A semaphore bounds in-flight writes, failures
//! retry with exponential backoff, and `fail_fast` aborts the remaining
//! fan-out of the record whose write failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::LogError;
use crate::pool::{Priority, ThreadPool};
use crate::sink::rotating::RotationEvent;
use crate::sink::{Sink, SinkId, WriteMeta};

/// Tuning for the parallel writer.
#[derive(Debug, Clone)]
pub struct ParallelWriteConfig {
    /// Bound on concurrently executing sink writes.
    pub max_concurrent: usize,
    /// Retry a failed write before reporting it.
    pub retry_on_failure: bool,
    pub max_retries: u32,
    /// First backoff; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Abort the rest of a record's fan-out after its first failure.
    pub fail_fast: bool,
    /// Coalesce successive pending writes to the same sink into one write.
    pub buffered: bool,
}

impl Default for ParallelWriteConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_on_failure: false,
            max_retries: 2,
            backoff_base_ms: 10,
            fail_fast: false,
            buffered: false,
        }
    }
}

/// Callback invoked with the sink name and the error after retries are
/// exhausted.
pub type SinkErrorHook = Arc<dyn Fn(&str, &LogError) + Send + Sync>;
/// Callback invoked when a write triggered a rotation.
pub type RotationHook = Arc<dyn Fn(&str, RotationEvent) + Send + Sync>;

/// Hooks threaded through to drain tasks.
#[derive(Clone, Default)]
pub struct WriterHooks {
    pub on_error: Option<SinkErrorHook>,
    pub on_rotation: Option<RotationHook>,
}

struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits.max(1)),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }
}

struct PendingWrite {
    bytes: Vec<u8>,
    meta: WriteMeta,
    /// Shared across one record's fan-out; set on failure under fail_fast.
    abort: Option<Arc<AtomicBool>>,
}

struct SinkQueue {
    sink: Arc<Sink>,
    pending: Mutex<VecDeque<PendingWrite>>,
    scheduled: AtomicBool,
}

/// Dispatches one record's formatted bytes to N sinks via the pool.
pub struct ParallelSinkWriter {
    config: ParallelWriteConfig,
    pool: Arc<ThreadPool>,
    hooks: WriterHooks,
    semaphore: Arc<Semaphore>,
    queues: Mutex<AHashMap<SinkId, Arc<SinkQueue>>>,
}

impl ParallelSinkWriter {
    pub fn new(
        config: ParallelWriteConfig,
        pool: Arc<ThreadPool>,
        hooks: WriterHooks,
    ) -> ParallelSinkWriter {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        ParallelSinkWriter {
            config,
            pool,
            hooks,
            semaphore,
            queues: Mutex::new(AHashMap::new()),
        }
    }

    /// Enqueues one record's rendered bytes for each target sink and
    /// schedules drains. Returns once everything is queued; delivery is
    /// asynchronous.
    pub fn write_record(&self, writes: Vec<(Arc<Sink>, Vec<u8>, WriteMeta)>) {
        let abort = self
            .config
            .fail_fast
            .then(|| Arc::new(AtomicBool::new(false)));
        for (sink, bytes, meta) in writes {
            let queue = self.queue_for(&sink);
            queue.pending.lock().push_back(PendingWrite {
                bytes,
                meta,
                abort: abort.clone(),
            });
            self.schedule(queue);
        }
    }

    /// Drops queue state for a removed sink.
    pub fn forget_sink(&self, id: SinkId) {
        self.queues.lock().remove(&id);
    }

    fn queue_for(&self, sink: &Arc<Sink>) -> Arc<SinkQueue> {
        let mut queues = self.queues.lock();
        Arc::clone(queues.entry(sink.id()).or_insert_with(|| {
            Arc::new(SinkQueue {
                sink: Arc::clone(sink),
                pending: Mutex::new(VecDeque::new()),
                scheduled: AtomicBool::new(false),
            })
        }))
    }

    fn schedule(&self, queue: Arc<SinkQueue>) {
        if queue.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let config = self.config.clone();
        let hooks = self.hooks.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let task_queue = Arc::clone(&queue);
        let submitted = self.pool.submit(Priority::High, move || {
            drain_queue(task_queue, config, semaphore, hooks)
        });
        if submitted.is_err() {
            // Pool shut down: deliver inline so nothing is stranded.
            drain_queue(
                queue,
                self.config.clone(),
                Arc::clone(&self.semaphore),
                self.hooks.clone(),
            );
        }
    }
}

fn drain_queue(
    queue: Arc<SinkQueue>,
    config: ParallelWriteConfig,
    semaphore: Arc<Semaphore>,
    hooks: WriterHooks,
) {
    loop {
        let batch = next_batch(&queue, &config);
        let Some(batch) = batch else {
            queue.scheduled.store(false, Ordering::Release);
            // A producer may have pushed between the empty check and the
            // flag clear; reclaim the drain if so.
            if queue.pending.lock().is_empty() || queue.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
            continue;
        };
        if let Some(abort) = &batch.abort {
            if abort.load(Ordering::Acquire) {
                continue;
            }
        }
        semaphore.acquire();
        let outcome = write_with_retry(&queue.sink, &batch.bytes, &batch.meta, &config);
        semaphore.release();
        match outcome {
            Ok(Some(event)) => {
                if let Some(on_rotation) = &hooks.on_rotation {
                    on_rotation(queue.sink.name(), event);
                }
            }
            Ok(None) => {}
            Err(err) => {
                if let Some(abort) = &batch.abort {
                    abort.store(true, Ordering::Release);
                }
                if let Some(on_error) = &hooks.on_error {
                    on_error(queue.sink.name(), &err);
                }
            }
        }
    }
}

// Pops the next write; under `buffered`, coalesces consecutive compatible
// writes into one buffer (same abort scope only).
fn next_batch(queue: &SinkQueue, config: &ParallelWriteConfig) -> Option<PendingWrite> {
    let mut pending = queue.pending.lock();
    let mut first = pending.pop_front()?;
    if config.buffered {
        while let Some(next) = pending.front() {
            let same_scope = match (&first.abort, &next.abort) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !same_scope || first.bytes.len() + next.bytes.len() > 64 * 1024 {
                break;
            }
            let Some(next) = pending.pop_front() else { break };
            first.bytes.extend_from_slice(&next.bytes);
        }
    }
    Some(first)
}

fn write_with_retry(
    sink: &Sink,
    bytes: &[u8],
    meta: &WriteMeta,
    config: &ParallelWriteConfig,
) -> crate::error::Result<Option<RotationEvent>> {
    let attempts = if config.retry_on_failure {
        config.max_retries + 1
    } else {
        1
    };
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = config.backoff_base_ms.saturating_mul(1 << (attempt - 1));
            std::thread::sleep(Duration::from_millis(backoff));
        }
        match sink.write(bytes, meta) {
            Ok(event) => return Ok(event),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or(LogError::QueueFull))
}
