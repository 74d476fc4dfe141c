//! Work-stealing thread pool with priority classes.
//!
//! Each worker owns a four-band deque (critical > high > normal > low); a
//! banded global queue receives untargeted submissions. An idle worker pops
//! its own queue front-first, then the global queue, then steals from the
//! back of a random peer before sleeping. Pool tasks run at most once.
//!
//! Workers carry a scratch-string arena (reset after every task) so
//! formatters can build lines without hitting the global allocator.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::ThreadPoolConfig;
use crate::error::{LogError, Result};

/// Task priority class. Higher classes are popped first; ordering within a
/// class is FIFO per queue and approximate across queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

/// A unit of work: closure, priority, and submission timestamp.
struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    submitted_at: Instant,
}

/// Four FIFO bands, one per priority class.
struct Bands {
    bands: [std::collections::VecDeque<Task>; Priority::COUNT],
    len: usize,
}

impl Bands {
    fn new() -> Self {
        Self {
            bands: Default::default(),
            len: 0,
        }
    }

    fn push(&mut self, priority: Priority, task: Task) {
        self.bands[priority.index()].push_back(task);
        self.len += 1;
    }

    /// Pops the front of the highest non-empty band.
    fn pop_front(&mut self) -> Option<Task> {
        for band in self.bands.iter_mut().rev() {
            if let Some(task) = band.pop_front() {
                self.len -= 1;
                return Some(task);
            }
        }
        None
    }

    /// Steals from the back of the highest non-empty band.
    fn steal_back(&mut self) -> Option<Task> {
        for band in self.bands.iter_mut().rev() {
            if let Some(task) = band.pop_back() {
                self.len -= 1;
                return Some(task);
            }
        }
        None
    }

    fn clear(&mut self) -> usize {
        let discarded = self.len;
        for band in self.bands.iter_mut() {
            band.clear();
        }
        self.len = 0;
        discarded
    }
}

/// Reusable scratch strings for one worker, derived from a pooled-string
/// allocator. `reset` runs after every task so scratch never outlives it.
pub struct ScratchArena {
    pool: Vec<String>,
    max: usize,
}

impl ScratchArena {
    pub fn new(max: usize) -> Self {
        Self {
            pool: Vec::with_capacity(max.min(16)),
            max,
        }
    }

    /// Takes a cleared string from the arena, or allocates one.
    pub fn acquire(&mut self) -> String {
        self.pool.pop().unwrap_or_else(|| String::with_capacity(256))
    }

    /// Returns a string for reuse. Dropped when the arena is full.
    pub fn release(&mut self, mut s: String) {
        s.clear();
        if self.pool.len() < self.max {
            self.pool.push(s);
        }
    }

    /// Clears every held string; called between tasks.
    pub fn reset(&mut self) {
        for s in self.pool.iter_mut() {
            s.clear();
        }
    }
}

thread_local! {
    static WORKER_ARENA: RefCell<Option<ScratchArena>> = const { RefCell::new(None) };
}

/// Runs `f` with the current pool worker's arena. Returns `None` when called
/// off a pool worker.
pub fn with_worker_arena<R>(f: impl FnOnce(&mut ScratchArena) -> R) -> Option<R> {
    WORKER_ARENA.with(|cell| cell.borrow_mut().as_mut().map(f))
}

const STATE_RUNNING: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_HALTING: u8 = 2;

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    stolen: AtomicU64,
    dropped: AtomicU64,
    wait_ns: AtomicU64,
    exec_ns: AtomicU64,
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub stolen: u64,
    pub dropped: u64,
    pub wait_time_ns_total: u64,
    pub exec_time_ns_total: u64,
    pub active_workers: usize,
    pub total_workers: usize,
}

impl PoolStats {
    /// Fraction of workers currently executing a task.
    pub fn utilization(&self) -> f64 {
        if self.total_workers == 0 {
            0.0
        } else {
            self.active_workers as f64 / self.total_workers as f64
        }
    }
}

struct PoolShared {
    global: Mutex<Bands>,
    work_available: Condvar,
    space_available: Condvar,
    locals: Vec<Arc<Mutex<Bands>>>,
    max_queued: usize,
    queued: AtomicUsize,
    active: AtomicUsize,
    state: AtomicU8,
    counters: PoolCounters,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
    arena_strings: usize,
}

impl PoolShared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn note_idle_if_drained(&self) {
        if self.queued.load(Ordering::Acquire) == 0 && self.active.load(Ordering::Acquire) == 0 {
            let _guard = self.idle_lock.lock();
            self.idle_cv.notify_all();
        }
    }
}

/// The work-stealing pool.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl ThreadPool {
    /// Spawns the configured number of workers.
    pub fn new(config: &ThreadPoolConfig) -> Result<ThreadPool> {
        config.validate()?;
        let workers = config.resolved_workers();
        let locals: Vec<Arc<Mutex<Bands>>> =
            (0..workers).map(|_| Arc::new(Mutex::new(Bands::new()))).collect();
        let shared = Arc::new(PoolShared {
            global: Mutex::new(Bands::new()),
            work_available: Condvar::new(),
            space_available: Condvar::new(),
            locals,
            max_queued: config.max_queued,
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            state: AtomicU8::new(STATE_RUNNING),
            counters: PoolCounters::default(),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            arena_strings: config.arena_strings,
        });
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("blazelog-worker-{}", index))
                .spawn(move || worker_loop(index, shared))
                .map_err(|e| LogError::Configuration(format!("failed to spawn worker: {}", e)))?;
            handles.push(handle);
        }
        Ok(ThreadPool {
            shared,
            handles: Mutex::new(handles),
            workers,
        })
    }

    /// Submits a task to the global queue. Blocks while the queue is at
    /// capacity unless the task is critical, which bypasses the bound.
    pub fn submit(&self, priority: Priority, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let task = Task {
            func: Box::new(f),
            submitted_at: Instant::now(),
        };
        let shared = &self.shared;
        let mut global = shared.global.lock();
        loop {
            if shared.state() != STATE_RUNNING {
                return Err(LogError::Configuration("thread pool is shut down".into()));
            }
            if shared.queued.load(Ordering::Acquire) < shared.max_queued
                || priority == Priority::Critical
            {
                global.push(priority, task);
                shared.queued.fetch_add(1, Ordering::AcqRel);
                shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                shared.work_available.notify_one();
                return Ok(());
            }
            shared.space_available.wait(&mut global);
        }
    }

    /// Non-blocking submit: a single `try_lock` attempt and a capacity
    /// check. Critical tasks bypass both.
    pub fn try_submit(&self, priority: Priority, f: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.shared.state() != STATE_RUNNING {
            return Err(LogError::Configuration("thread pool is shut down".into()));
        }
        if priority == Priority::Critical {
            return self.submit(priority, f);
        }
        let Some(mut global) = self.shared.global.try_lock() else {
            return Err(LogError::QueueFull);
        };
        if self.shared.queued.load(Ordering::Acquire) >= self.shared.max_queued {
            return Err(LogError::QueueFull);
        }
        global.push(
            priority,
            Task {
                func: Box::new(f),
                submitted_at: Instant::now(),
            },
        );
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Pins a task to one worker's local queue (stealable by peers).
    pub fn submit_to_worker(
        &self,
        worker: usize,
        priority: Priority,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        if self.shared.state() != STATE_RUNNING {
            return Err(LogError::Configuration("thread pool is shut down".into()));
        }
        let Some(local) = self.shared.locals.get(worker) else {
            return Err(LogError::Configuration(format!(
                "worker index {} out of range ({} workers)",
                worker, self.workers
            )));
        };
        local.lock().push(
            priority,
            Task {
                func: Box::new(f),
                submitted_at: Instant::now(),
            },
        );
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let _guard = self.shared.global.lock();
        self.shared.work_available.notify_all();
        Ok(())
    }

    /// Submits a batch under a single lock acquisition.
    pub fn submit_batch(
        &self,
        priority: Priority,
        tasks: Vec<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Result<()> {
        let shared = &self.shared;
        let mut global = shared.global.lock();
        if shared.state() != STATE_RUNNING {
            return Err(LogError::Configuration("thread pool is shut down".into()));
        }
        let count = tasks.len();
        let now = Instant::now();
        for func in tasks {
            global.push(
                priority,
                Task {
                    func,
                    submitted_at: now,
                },
            );
        }
        shared.queued.fetch_add(count, Ordering::AcqRel);
        shared.counters.submitted.fetch_add(count as u64, Ordering::Relaxed);
        shared.work_available.notify_all();
        Ok(())
    }

    /// Blocks until every queue is empty and no task is executing.
    pub fn wait_all(&self) {
        let shared = &self.shared;
        let mut guard = shared.idle_lock.lock();
        loop {
            if shared.queued.load(Ordering::Acquire) == 0
                && shared.active.load(Ordering::Acquire) == 0
            {
                return;
            }
            shared
                .idle_cv
                .wait_for(&mut guard, Duration::from_millis(10));
        }
    }

    /// Stops accepting work, drains remaining tasks, and joins workers.
    /// On timeout the remainder is discarded and counted as dropped.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shared.state.store(STATE_DRAINING, Ordering::Release);
        {
            let _guard = self.shared.global.lock();
            self.shared.work_available.notify_all();
            self.shared.space_available.notify_all();
        }
        let deadline = Instant::now() + timeout;
        let timed_out = {
            let shared = &self.shared;
            let mut guard = shared.idle_lock.lock();
            loop {
                if shared.queued.load(Ordering::Acquire) == 0
                    && shared.active.load(Ordering::Acquire) == 0
                {
                    break false;
                }
                if Instant::now() >= deadline {
                    break true;
                }
                shared
                    .idle_cv
                    .wait_for(&mut guard, Duration::from_millis(10));
            }
        };
        if timed_out {
            self.discard_pending();
        }
        self.shared.state.store(STATE_HALTING, Ordering::Release);
        self.join_workers();
        if timed_out {
            Err(LogError::ShutdownTimeout("thread pool"))
        } else {
            Ok(())
        }
    }

    /// Discards pending tasks, finishes in-flight ones, and joins workers.
    pub fn halt(&self) {
        self.discard_pending();
        self.shared.state.store(STATE_HALTING, Ordering::Release);
        self.join_workers();
    }

    fn discard_pending(&self) {
        let mut discarded = 0;
        {
            let mut global = self.shared.global.lock();
            discarded += global.clear();
        }
        for local in &self.shared.locals {
            discarded += local.lock().clear();
        }
        if discarded > 0 {
            self.shared.queued.fetch_sub(discarded, Ordering::AcqRel);
            self.shared
                .counters
                .dropped
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }
        self.shared.note_idle_if_drained();
    }

    fn join_workers(&self) {
        {
            let _guard = self.shared.global.lock();
            self.shared.work_available.notify_all();
            self.shared.space_available.notify_all();
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// True when no task is queued or executing.
    pub fn is_idle(&self) -> bool {
        self.shared.queued.load(Ordering::Acquire) == 0
            && self.shared.active.load(Ordering::Acquire) == 0
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            stolen: c.stolen.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            wait_time_ns_total: c.wait_ns.load(Ordering::Relaxed),
            exec_time_ns_total: c.exec_ns.load(Ordering::Relaxed),
            active_workers: self.shared.active.load(Ordering::Acquire),
            total_workers: self.workers,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.shared.state() == STATE_RUNNING {
            let _ = self.shutdown(Duration::from_secs(5));
        } else {
            self.join_workers();
        }
    }
}

fn worker_loop(index: usize, shared: Arc<PoolShared>) {
    WORKER_ARENA.with(|cell| {
        *cell.borrow_mut() = Some(ScratchArena::new(shared.arena_strings));
    });
    // Cheap per-worker PRNG for steal victim selection.
    let mut rng_state: u64 = 0x9E3779B97F4A7C15u64.wrapping_mul(index as u64 + 1);
    let mut next_rand = move || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        rng_state
    };

    loop {
        let state = shared.state();
        if state == STATE_HALTING {
            break;
        }

        let mut popped = shared.locals[index].lock().pop_front();
        let mut stolen = false;

        if popped.is_none() {
            popped = shared.global.lock().pop_front();
        }

        if popped.is_none() {
            let peers = shared.locals.len();
            if peers > 1 {
                let start = (next_rand() as usize) % peers;
                for offset in 0..peers {
                    let victim = (start + offset) % peers;
                    if victim == index {
                        continue;
                    }
                    if let Some(task) = shared.locals[victim].lock().steal_back() {
                        popped = Some(task);
                        stolen = true;
                        break;
                    }
                }
            }
        }

        match popped {
            Some(task) => {
                shared.queued.fetch_sub(1, Ordering::AcqRel);
                shared.active.fetch_add(1, Ordering::AcqRel);
                if stolen {
                    shared.counters.stolen.fetch_add(1, Ordering::Relaxed);
                }
                {
                    let _guard = shared.global.lock();
                    shared.space_available.notify_one();
                }
                let started = Instant::now();
                shared.counters.wait_ns.fetch_add(
                    started.duration_since(task.submitted_at).as_nanos() as u64,
                    Ordering::Relaxed,
                );
                let func = task.func;
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(func));
                shared
                    .counters
                    .exec_ns
                    .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                WORKER_ARENA.with(|cell| {
                    if let Some(arena) = cell.borrow_mut().as_mut() {
                        arena.reset();
                    }
                });
                shared.active.fetch_sub(1, Ordering::AcqRel);
                shared.note_idle_if_drained();
            }
            None => {
                if state != STATE_RUNNING {
                    // Draining and nothing left anywhere: exit.
                    if shared.queued.load(Ordering::Acquire) == 0 {
                        break;
                    }
                    continue;
                }
                let mut global = shared.global.lock();
                if global.len == 0 {
                    shared
                        .work_available
                        .wait_for(&mut global, Duration::from_millis(50));
                }
            }
        }
    }
    WORKER_ARENA.with(|cell| {
        *cell.borrow_mut() = None;
    });
}
