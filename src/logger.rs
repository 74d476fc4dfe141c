//! The public logging façade.
//!
//! A [`Logger`] owns its sinks, the admission pipeline, and the optional
//! async dispatcher, thread pool, and scheduler. Cloning a logger (or
//! calling [`Logger::scoped`]) produces another handle onto the same core;
//! the core tears everything down when the last handle drops: scheduler
//! first, then the dispatcher drain, sink flushes, and the pool, bounded by
//! `shutdown_timeout_ms`, with dropped records reported through the
//! destroyed callback.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;

use crate::compress::{CompressionCallbacks, compress_file, compress_file_background};
use crate::config::{Config, SinkConfig};
use crate::diag;
use crate::dispatch::{AsyncDispatcher, DispatchContext, DispatchStats, EnqueueOutcome};
use crate::error::{LogError, Result};
use crate::levels::{Level, LevelRegistry};
use crate::parallel::{ParallelSinkWriter, WriterHooks};
use crate::pipeline::filter::Filter;
use crate::pipeline::redactor::Redactor;
use crate::pipeline::rules::{RulesConfig, RulesEngine};
use crate::pipeline::sampler::Sampler;
use crate::pipeline::{Pipeline, Rejection};
use crate::pool::ThreadPool;
use crate::record::{ContextChain, ContextValue, Record, SourceLocation};
use crate::scheduler::{ScheduledTask, Scheduler, SchedulerHooks, TaskSnapshot};
use crate::sink::rotating::RotationEvent;
use crate::sink::{CustomSink, Sink, SinkId};

/// Trace correlation state attached to new records.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub correlation_id: Option<String>,
}

type SinkErrorCb = Box<dyn Fn(&str, &LogError) + Send + Sync>;
type OverflowCb = Box<dyn Fn(u64) + Send + Sync>;
type CompressionErrorCb = Box<dyn Fn(&Path, &LogError) + Send + Sync>;
type DestroyedCb = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct CallbackSet {
    on_sink_error: ArcSwapOption<SinkErrorCb>,
    on_overflow: ArcSwapOption<OverflowCb>,
    on_rotation_error: ArcSwapOption<SinkErrorCb>,
    on_compression_error: ArcSwapOption<CompressionErrorCb>,
    on_destroyed: ArcSwapOption<DestroyedCb>,
}

thread_local! {
    // Re-entrancy guard: user callbacks must not log back into the logger.
    static IN_CALLBACK: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
    static SYNC_SCRATCH: std::cell::RefCell<String> =
        std::cell::RefCell::new(String::with_capacity(512));
}

fn guarded<R>(f: impl FnOnce() -> R) -> R {
    IN_CALLBACK.with(|flag| {
        flag.set(true);
        let result = f();
        flag.set(false);
        result
    })
}

#[derive(Default)]
struct Metrics {
    total_logs: AtomicU64,
    filtered: AtomicU64,
    sampled: AtomicU64,
    dropped: AtomicU64,
    sink_errors: AtomicU64,
}

/// Point-in-time logger counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LoggerMetrics {
    pub total_logs: u64,
    pub records_filtered: u64,
    pub records_sampled_out: u64,
    pub records_dropped: u64,
    pub sink_errors: u64,
}

struct ScopeChain {
    label: String,
    parent: Option<Arc<ScopeChain>>,
}

impl ScopeChain {
    fn full_label(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}.{}", parent.full_label(), self.label),
            None => self.label.clone(),
        }
    }
}

struct LoggerCore {
    config: Config,
    registry: Arc<LevelRegistry>,
    pipeline: Pipeline,
    sinks: Arc<RwLock<Vec<Arc<Sink>>>>,
    next_sink_id: AtomicUsize,
    context: ArcSwap<ContextChain>,
    trace: ArcSwap<TraceContext>,
    dispatch_ctx: DispatchContext,
    dispatcher: Option<Arc<AsyncDispatcher>>,
    pool: Option<Arc<ThreadPool>>,
    parallel: Option<Arc<ParallelSinkWriter>>,
    scheduler: Option<Scheduler>,
    callbacks: Arc<CallbackSet>,
    metrics: Arc<Metrics>,
}

/// The logging façade. Cheap to clone; all clones share one core.
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
    scope: Option<Arc<ScopeChain>>,
}

static SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_span_id() -> String {
    format!("{:016x}", SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Restores the previous span when dropped; optionally emits a completion
/// record first.
pub struct SpanGuard {
    logger: Logger,
    name: String,
    previous: Arc<TraceContext>,
    started: Instant,
    emit_completion: bool,
}

impl SpanGuard {
    /// Emit a debug record with the span's elapsed time on drop.
    pub fn with_completion(mut self) -> SpanGuard {
        self.emit_completion = true;
        self
    }

    pub fn span_id(&self) -> Option<String> {
        self.logger.core.trace.load().span_id.clone()
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.emit_completion {
            let elapsed = self.started.elapsed();
            let _ = self.logger.log_fmt(
                Level::Debug,
                format_args!("span '{}' closed after {:?}", self.name, elapsed),
            );
        }
        // Always restore the parent span, even without a completion record.
        self.logger.core.trace.store(Arc::clone(&self.previous));
    }
}

impl Logger {
    /// Constructs a logger from a full configuration.
    pub fn init(config: Config) -> Result<Logger> {
        config.validate()?;
        let registry = Arc::new(LevelRegistry::new());
        let sinks: Arc<RwLock<Vec<Arc<Sink>>>> = Arc::new(RwLock::new(Vec::new()));
        let callbacks = Arc::new(CallbackSet::default());
        let metrics = Arc::new(Metrics::default());

        let pool = match &config.thread_pool {
            Some(pool_cfg) => Some(Arc::new(ThreadPool::new(pool_cfg)?)),
            None => None,
        };

        let hooks = WriterHooks {
            on_error: Some(sink_error_hook(Arc::clone(&callbacks), Arc::clone(&metrics))),
            on_rotation: Some(rotation_hook(
                Arc::clone(&sinks),
                pool.clone(),
                Arc::clone(&callbacks),
            )),
        };

        let parallel = pool.as_ref().map(|pool| {
            Arc::new(ParallelSinkWriter::new(
                config.parallel_write.clone(),
                Arc::clone(pool),
                hooks.clone(),
            ))
        });

        let dispatch_ctx = DispatchContext {
            sinks: Arc::clone(&sinks),
            registry: Arc::clone(&registry),
            color_display: config.color_display,
            parallel: parallel.clone(),
            hooks: hooks.clone(),
        };

        let dispatcher = match &config.async_mode {
            Some(async_cfg) => Some(Arc::new(AsyncDispatcher::start(
                async_cfg.clone(),
                dispatch_ctx.clone(),
            )?)),
            None => None,
        };

        let scheduler = match &config.scheduler {
            Some(sched_cfg) => {
                let scheduler_hooks = SchedulerHooks {
                    flush: Some(flush_hook(dispatcher.clone(), Arc::clone(&sinks))),
                    rotate: Some(rotate_by_name_hook(
                        Arc::clone(&sinks),
                        pool.clone(),
                        Arc::clone(&callbacks),
                    )),
                    health: Some(health_hook(dispatch_ctx.clone())),
                    on_task_error: Some(task_error_hook(Arc::clone(&callbacks))),
                };
                Some(Scheduler::start(
                    sched_cfg.clone(),
                    scheduler_hooks,
                    pool.clone(),
                )?)
            }
            None => None,
        };

        let logger = Logger {
            core: Arc::new(LoggerCore {
                config,
                registry,
                pipeline: Pipeline::new(),
                sinks,
                next_sink_id: AtomicUsize::new(1),
                context: ArcSwap::from_pointee(ContextChain::new()),
                trace: ArcSwap::from_pointee(TraceContext::default()),
                dispatch_ctx,
                dispatcher,
                pool,
                parallel,
                scheduler,
                callbacks,
                metrics,
            }),
            scope: None,
        };
        if logger.core.config.console {
            logger.add(SinkConfig::console())?;
        }
        Ok(logger)
    }

    /// A console logger with default settings.
    pub fn init_default() -> Result<Logger> {
        Logger::init(Config::default())
    }

    // ----- sinks -----

    /// Adds a sink; returns its stable id.
    pub fn add(&self, config: SinkConfig) -> Result<SinkId> {
        let id = self.core.next_sink_id.fetch_add(1, Ordering::AcqRel);
        let sink = Arc::new(Sink::from_config(id, &config, &self.core.config)?);
        self.core.sinks.write().push(sink);
        Ok(id)
    }

    /// Adds a user-callback sink.
    pub fn add_custom(&self, name: &str, custom: CustomSink) -> SinkId {
        let id = self.core.next_sink_id.fetch_add(1, Ordering::AcqRel);
        let sink = Arc::new(Sink::custom(id, name, &self.core.config, custom));
        self.core.sinks.write().push(sink);
        id
    }

    /// Removes a sink, draining its in-flight writes first. Returns whether
    /// the id existed.
    pub fn remove(&self, id: SinkId) -> Result<bool> {
        let removed = {
            let mut sinks = self.core.sinks.write();
            match sinks.iter().position(|s| s.id() == id) {
                Some(index) => Some(sinks.remove(index)),
                None => None,
            }
        };
        let Some(sink) = removed else {
            return Ok(false);
        };
        if let Some(parallel) = &self.core.parallel {
            parallel.forget_sink(id);
        }
        let deadline = Instant::now() + Duration::from_millis(self.core.config.shutdown_timeout_ms);
        while sink.in_flight() > 0 {
            if Instant::now() >= deadline {
                return Err(LogError::ShutdownTimeout("sink removal"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        sink.flush()?;
        Ok(true)
    }

    /// Runs `f` against the sink with the given id.
    pub fn with_sink<R>(&self, id: SinkId, f: impl FnOnce(&Sink) -> R) -> Option<R> {
        let sinks = self.core.sinks.read();
        sinks.iter().find(|s| s.id() == id).map(|s| f(s))
    }

    pub fn sink_count(&self) -> usize {
        self.core.sinks.read().len()
    }

    // ----- levels -----

    /// Registers a custom level; later registrations win per priority.
    pub fn register_level(&self, name: &str, priority: u8, style: &str) -> Level {
        self.core.registry.register(name, priority, style)
    }

    /// Resolves a level name against built-ins and custom registrations.
    pub fn resolve_level(&self, name: &str) -> Option<Level> {
        self.core.registry.resolve(name)
    }

    // ----- pipeline stages -----

    pub fn set_filter(&self, filter: Option<Filter>) {
        self.core.pipeline.set_filter(filter);
    }

    pub fn set_sampler(&self, sampler: Option<Sampler>) {
        self.core.pipeline.set_sampler(sampler);
    }

    pub fn set_redactor(&self, redactor: Option<Redactor>) {
        self.core.pipeline.set_redactor(redactor);
    }

    pub fn set_rules(&self, rules: RulesConfig) -> Result<()> {
        self.core.pipeline.set_rules(Some(RulesEngine::new(rules)?));
        Ok(())
    }

    // ----- context and tracing -----

    /// Binds a context key for all subsequent records from this logger.
    pub fn bind(&self, key: &str, value: impl Into<ContextValue>) {
        let value = value.into();
        self.core
            .context
            .rcu(|chain| chain.bind(key.to_string(), value.clone()));
    }

    pub fn unbind(&self, key: &str) {
        self.core.context.rcu(|chain| chain.unbind(key));
    }

    /// A child façade layering a module label; context is shared, not
    /// copied.
    pub fn scoped(&self, name: &str) -> Logger {
        Logger {
            core: Arc::clone(&self.core),
            scope: Some(Arc::new(ScopeChain {
                label: name.to_string(),
                parent: self.scope.clone(),
            })),
        }
    }

    pub fn set_trace_context(&self, trace_id: &str, span_id: Option<&str>) {
        let previous = self.core.trace.load();
        self.core.trace.store(Arc::new(TraceContext {
            trace_id: Some(trace_id.to_string()),
            span_id: span_id.map(|s| s.to_string()),
            correlation_id: previous.correlation_id.clone(),
        }));
    }

    pub fn set_correlation_id(&self, correlation_id: &str) {
        let previous = self.core.trace.load();
        self.core.trace.store(Arc::new(TraceContext {
            trace_id: previous.trace_id.clone(),
            span_id: previous.span_id.clone(),
            correlation_id: Some(correlation_id.to_string()),
        }));
    }

    /// Opens a span: records get the new span id until the guard drops and
    /// restores the previous one.
    pub fn start_span(&self, name: &str) -> SpanGuard {
        let previous = self.core.trace.load_full();
        self.core.trace.store(Arc::new(TraceContext {
            trace_id: previous.trace_id.clone(),
            span_id: Some(next_span_id()),
            correlation_id: previous.correlation_id.clone(),
        }));
        SpanGuard {
            logger: self.clone(),
            name: name.to_string(),
            previous,
            started: Instant::now(),
            emit_completion: false,
        }
    }

    // ----- logging -----

    /// Builds and dispatches a record. Returns configuration and allocation
    /// errors only; sink failures flow through callbacks.
    pub fn log(&self, level: Level, message: &str) -> Result<()> {
        self.log_with(level, message, None)
    }

    /// As [`Logger::log`], with an explicit source location.
    pub fn log_with(
        &self,
        level: Level,
        message: &str,
        source: Option<SourceLocation>,
    ) -> Result<()> {
        if IN_CALLBACK.with(|flag| flag.get()) {
            // A callback re-entered the logger; swallow to avoid recursion.
            self.core.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if level.priority() < self.core.config.min_level.priority() {
            return Ok(());
        }
        if let Some(max) = self.core.config.max_message_size {
            if message.len() > max {
                return Err(LogError::Configuration(format!(
                    "message length {} exceeds max_message_size {}",
                    message.len(),
                    max
                )));
            }
        }
        let mut record = Record::new(level, self.core.registry.name_of(level), message)?;
        record.source = source;
        if let Some(scope) = &self.scope {
            record.module_label = Some(scope.full_label());
        }
        record.context = ContextChain::clone(&self.core.context.load());
        {
            let trace = self.core.trace.load();
            record.trace_id = trace.trace_id.clone();
            record.span_id = trace.span_id.clone();
            record.correlation_id = trace.correlation_id.clone();
        }
        if self.core.config.capture_backtrace && level.priority() >= Level::Error.priority() {
            record.backtrace = Some(std::backtrace::Backtrace::force_capture().to_string());
        }

        match self.core.pipeline.process(&mut record) {
            Ok(()) => {}
            Err(Rejection::Filtered) => {
                self.core.metrics.filtered.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(Rejection::Sampled) => {
                self.core.metrics.sampled.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        self.core.metrics.total_logs.fetch_add(1, Ordering::Relaxed);

        match &self.core.dispatcher {
            Some(dispatcher) => {
                match dispatcher.enqueue(record) {
                    EnqueueOutcome::Queued => {}
                    EnqueueOutcome::QueuedEvictedOldest => self.report_overflow(1),
                    EnqueueOutcome::Dropped | EnqueueOutcome::Shutdown => {
                        self.core.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        self.report_overflow(1);
                    }
                }
                Ok(())
            }
            None => {
                SYNC_SCRATCH.with(|scratch| {
                    let mut scratch = scratch.borrow_mut();
                    self.core.dispatch_ctx.dispatch(&record, &mut scratch);
                });
                Ok(())
            }
        }
    }

    /// Formats arguments into the message before dispatch.
    pub fn log_fmt(&self, level: Level, args: std::fmt::Arguments<'_>) -> Result<()> {
        match args.as_str() {
            Some(literal) => self.log(level, literal),
            None => self.log(level, &args.to_string()),
        }
    }

    /// Logs at a level referenced by name (built-in or custom).
    pub fn log_named(&self, level: &str, message: &str) -> Result<()> {
        let level = self
            .core
            .registry
            .resolve(level)
            .ok_or_else(|| LogError::Configuration(format!("unknown level: '{}'", level)))?;
        self.log(level, message)
    }

    pub fn trace(&self, message: &str) -> Result<()> {
        self.log(Level::Trace, message)
    }

    pub fn debug(&self, message: &str) -> Result<()> {
        self.log(Level::Debug, message)
    }

    pub fn info(&self, message: &str) -> Result<()> {
        self.log(Level::Info, message)
    }

    pub fn notice(&self, message: &str) -> Result<()> {
        self.log(Level::Notice, message)
    }

    pub fn success(&self, message: &str) -> Result<()> {
        self.log(Level::Success, message)
    }

    pub fn warning(&self, message: &str) -> Result<()> {
        self.log(Level::Warning, message)
    }

    pub fn error(&self, message: &str) -> Result<()> {
        self.log(Level::Error, message)
    }

    pub fn fail(&self, message: &str) -> Result<()> {
        self.log(Level::Fail, message)
    }

    pub fn critical(&self, message: &str) -> Result<()> {
        self.log(Level::Critical, message)
    }

    pub fn fatal(&self, message: &str) -> Result<()> {
        self.log(Level::Fatal, message)
    }

    fn report_overflow(&self, count: u64) {
        if let Some(cb) = self.core.callbacks.on_overflow.load_full() {
            guarded(|| cb(count));
        }
    }

    // ----- flushing and lifecycle -----

    /// Completes all pending async writes across all sinks, bounded by the
    /// configured shutdown timeout.
    pub fn flush(&self) -> Result<()> {
        self.flush_timeout(Duration::from_millis(self.core.config.shutdown_timeout_ms))
    }

    /// As [`Logger::flush`] with an explicit bound.
    pub fn flush_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        if let Some(dispatcher) = &self.core.dispatcher {
            dispatcher.flush(timeout)?;
        }
        if let Some(pool) = &self.core.pool {
            while !pool.is_idle() {
                if Instant::now() >= deadline {
                    return Err(LogError::ShutdownTimeout("parallel sink writer"));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        let sinks: Vec<Arc<Sink>> = self.core.sinks.read().iter().cloned().collect();
        for sink in sinks {
            if let Err(err) = sink.flush() {
                self.core.metrics.sink_errors.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = self.core.callbacks.on_sink_error.load_full() {
                    guarded(|| cb(sink.name(), &err));
                }
            }
        }
        Ok(())
    }

    // ----- scheduler -----

    /// Registers a maintenance task; errors when no scheduler is configured.
    pub fn schedule(&self, task: ScheduledTask) -> Result<usize> {
        match &self.core.scheduler {
            Some(scheduler) => Ok(scheduler.add_task(task)),
            None => Err(LogError::Configuration(
                "no scheduler configured for this logger".into(),
            )),
        }
    }

    pub fn scheduled_tasks(&self) -> Vec<TaskSnapshot> {
        match &self.core.scheduler {
            Some(scheduler) => scheduler.snapshot(),
            None => Vec::new(),
        }
    }

    // ----- callbacks -----

    pub fn on_sink_error(&self, cb: impl Fn(&str, &LogError) + Send + Sync + 'static) {
        self.core
            .callbacks
            .on_sink_error
            .store(Some(Arc::new(Box::new(cb))));
    }

    pub fn on_overflow(&self, cb: impl Fn(u64) + Send + Sync + 'static) {
        self.core
            .callbacks
            .on_overflow
            .store(Some(Arc::new(Box::new(cb))));
    }

    pub fn on_rotation_error(&self, cb: impl Fn(&str, &LogError) + Send + Sync + 'static) {
        self.core
            .callbacks
            .on_rotation_error
            .store(Some(Arc::new(Box::new(cb))));
    }

    pub fn on_compression_error(&self, cb: impl Fn(&Path, &LogError) + Send + Sync + 'static) {
        self.core
            .callbacks
            .on_compression_error
            .store(Some(Arc::new(Box::new(cb))));
    }

    pub fn on_destroyed(&self, cb: impl Fn(u64) + Send + Sync + 'static) {
        self.core
            .callbacks
            .on_destroyed
            .store(Some(Arc::new(Box::new(cb))));
    }

    // ----- observability -----

    pub fn metrics(&self) -> LoggerMetrics {
        let m = &self.core.metrics;
        let dispatcher_dropped = self
            .core
            .dispatcher
            .as_ref()
            .map(|d| d.stats().records_dropped)
            .unwrap_or(0);
        LoggerMetrics {
            total_logs: m.total_logs.load(Ordering::Relaxed),
            records_filtered: m.filtered.load(Ordering::Relaxed),
            records_sampled_out: m.sampled.load(Ordering::Relaxed),
            records_dropped: m.dropped.load(Ordering::Relaxed).max(dispatcher_dropped),
            sink_errors: m.sink_errors.load(Ordering::Relaxed),
        }
    }

    pub fn dispatch_stats(&self) -> Option<DispatchStats> {
        self.core.dispatcher.as_ref().map(|d| d.stats())
    }

    pub fn pool_stats(&self) -> Option<crate::pool::PoolStats> {
        self.core.pool.as_ref().map(|p| p.stats())
    }
}

impl Drop for LoggerCore {
    fn drop(&mut self) {
        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        if let Some(scheduler) = &self.scheduler {
            let _ = scheduler.shutdown(timeout);
        }
        if let Some(dispatcher) = &self.dispatcher {
            let _ = dispatcher.stop(timeout);
        }
        if let Some(pool) = &self.pool {
            let _ = pool.shutdown(timeout);
        }
        for sink in self.sinks.read().iter() {
            let _ = sink.flush();
        }
        let dropped = self.metrics.dropped.load(Ordering::Relaxed).max(
            self.dispatcher
                .as_ref()
                .map(|d| d.stats().records_dropped)
                .unwrap_or(0),
        );
        if let Some(cb) = self.callbacks.on_destroyed.load_full() {
            guarded(|| cb(dropped));
        }
    }
}

// ----- hook constructors -----

fn sink_error_hook(callbacks: Arc<CallbackSet>, metrics: Arc<Metrics>) -> crate::parallel::SinkErrorHook {
    Arc::new(move |sink_name, err| {
        metrics.sink_errors.fetch_add(1, Ordering::Relaxed);
        let cb = match err {
            LogError::Rotation { .. } => callbacks.on_rotation_error.load_full(),
            _ => callbacks.on_sink_error.load_full(),
        };
        if let Some(cb) = cb {
            guarded(|| cb(sink_name, err));
        }
    })
}

fn task_error_hook(
    callbacks: Arc<CallbackSet>,
) -> Arc<dyn Fn(&str, &LogError) + Send + Sync> {
    Arc::new(move |task_name, err| {
        if let Some(cb) = callbacks.on_sink_error.load_full() {
            guarded(|| cb(task_name, err));
        }
    })
}

// Routes a rotation's compressed handoff onto the pool (or inline without
// one) with the sink's own compression settings.
fn rotation_hook(
    sinks: Arc<RwLock<Vec<Arc<Sink>>>>,
    pool: Option<Arc<ThreadPool>>,
    callbacks: Arc<CallbackSet>,
) -> crate::parallel::RotationHook {
    Arc::new(move |sink_name: &str, event: RotationEvent| {
        let Some(path) = event.compress else {
            return;
        };
        let config = {
            let sinks = sinks.read();
            sinks
                .iter()
                .find(|s| s.name() == sink_name)
                .and_then(|s| s.compression_config().cloned())
        };
        let Some(config) = config else {
            return;
        };
        let compression_callbacks = CompressionCallbacks {
            on_error: Some({
                let callbacks = Arc::clone(&callbacks);
                Arc::new(move |src: &Path, err: &LogError| {
                    if let Some(cb) = callbacks.on_compression_error.load_full() {
                        guarded(|| cb(src, err));
                    }
                })
            }),
            ..Default::default()
        };
        match (&pool, config.background) {
            (Some(pool), true) => {
                let _ = compress_file_background(pool, path, None, config, compression_callbacks);
            }
            _ => {
                let _ = compress_file(&path, None, &config, &compression_callbacks);
            }
        }
    })
}

fn flush_hook(
    dispatcher: Option<Arc<AsyncDispatcher>>,
    sinks: Arc<RwLock<Vec<Arc<Sink>>>>,
) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        if let Some(dispatcher) = &dispatcher {
            let _ = dispatcher.flush(Duration::from_secs(5));
        }
        for sink in sinks.read().iter() {
            let _ = sink.flush();
        }
    })
}

fn rotate_by_name_hook(
    sinks: Arc<RwLock<Vec<Arc<Sink>>>>,
    pool: Option<Arc<ThreadPool>>,
    callbacks: Arc<CallbackSet>,
) -> Arc<dyn Fn(&str) -> Result<()> + Send + Sync> {
    let on_rotation = rotation_hook(Arc::clone(&sinks), pool, callbacks);
    Arc::new(move |sink_name: &str| {
        let sink = {
            let sinks = sinks.read();
            sinks.iter().find(|s| s.name() == sink_name).cloned()
        };
        let Some(sink) = sink else {
            return Err(LogError::Scheduler(format!(
                "no sink named '{}' to rotate",
                sink_name
            )));
        };
        let event = sink.force_rotate()?;
        on_rotation(sink_name, event);
        Ok(())
    })
}

// Emits a diagnostics record straight through the dispatch context.
fn health_hook(context: DispatchContext) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        let snapshot = diag::snapshot();
        let message = match serde_json::to_string(&snapshot) {
            Ok(json) => format!("health check: {}", json),
            Err(_) => "health check".to_string(),
        };
        if let Ok(record) = Record::new(Level::Notice, "NOTICE", &message) {
            let mut scratch = String::with_capacity(256);
            context.dispatch(&record, &mut scratch);
        }
    })
}

// ----- default logger registry -----

static DEFAULT_LOGGER: Lazy<ArcSwapOption<Logger>> = Lazy::new(ArcSwapOption::empty);

/// Installs the process-wide default logger (atomic swap; hot-path readers
/// pay one pointer load).
pub fn set_default(logger: Logger) {
    DEFAULT_LOGGER.store(Some(Arc::new(logger)));
}

/// The process-wide default logger, when one is installed.
pub fn default_logger() -> Option<Arc<Logger>> {
    DEFAULT_LOGGER.load_full()
}

/// Removes the default logger; its core tears down when the last handle
/// drops.
pub fn clear_default() {
    DEFAULT_LOGGER.store(None);
}
