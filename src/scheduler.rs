//! Timed maintenance tasks: cleanup, compression, rotation, flush, health
//! checks, and user callbacks.
//!
//! A single driver thread wakes at the earliest `next_run` or every
//! `check_interval_ms`, whichever is sooner, and executes due tasks on the
//! thread pool (bounded by `max_concurrent_tasks`) or inline when no pool is
//! attached. Failing tasks retry after `retry_delay_ms` up to `max_retries`,
//! then resume their regular schedule. Daily and weekly boundaries are
//! computed in the scheduler's fixed UTC offset.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc, Weekday};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::compress::{CompressionCallbacks, compress_file};
use crate::config::{CompressionConfig, SchedulerConfig};
use crate::error::{LogError, Result};
use crate::pool::{Priority, ThreadPool};

/// One field of a cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Step(u32),
    Values(Vec<u32>),
}

impl CronField {
    fn parse(s: &str) -> Result<CronField> {
        if s == "*" {
            return Ok(CronField::Any);
        }
        if let Some(step) = s.strip_prefix("*/") {
            let step: u32 = step
                .parse()
                .map_err(|_| LogError::Configuration(format!("invalid cron step: '{}'", s)))?;
            if step == 0 {
                return Err(LogError::Configuration("cron step must be non-zero".into()));
            }
            return Ok(CronField::Step(step));
        }
        let mut values = Vec::new();
        for part in s.split(',') {
            let value: u32 = part
                .parse()
                .map_err(|_| LogError::Configuration(format!("invalid cron field: '{}'", s)))?;
            values.push(value);
        }
        Ok(CronField::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Step(step) => value % step == 0,
            CronField::Values(values) => values.contains(&value),
        }
    }
}

/// A five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week (0 = Sunday). Supports `*`, `*/step`, and comma lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<CronExpr> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(LogError::Configuration(format!(
                "cron expression needs 5 fields, got {}: '{}'",
                fields.len(),
                expr
            )));
        }
        Ok(CronExpr {
            minute: CronField::parse(fields[0])?,
            hour: CronField::parse(fields[1])?,
            day_of_month: CronField::parse(fields[2])?,
            month: CronField::parse(fields[3])?,
            day_of_week: CronField::parse(fields[4])?,
        })
    }

    fn matches(&self, local: &DateTime<FixedOffset>) -> bool {
        self.minute.matches(local.minute())
            && self.hour.matches(local.hour())
            && self.day_of_month.matches(local.day())
            && self.month.matches(local.month())
            && self
                .day_of_week
                .matches(local.weekday().num_days_from_sunday())
    }
}

/// When a task runs.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every `ms` milliseconds.
    Interval { ms: u64 },
    /// Daily at the local hour and minute.
    Daily { hour: u32, minute: u32 },
    /// Weekly on the local weekday at hour and minute.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// Exactly once at the given instant.
    Once { at: DateTime<Utc> },
    /// Cron-like, evaluated in the scheduler's offset.
    Cron { expr: CronExpr },
}

/// Computes the next run strictly after `after`, with daily/weekly/cron
/// boundaries evaluated in `offset`.
pub fn next_run_after(
    schedule: &Schedule,
    after: DateTime<Utc>,
    offset: FixedOffset,
) -> DateTime<Utc> {
    match schedule {
        Schedule::Interval { ms } => after + chrono::Duration::milliseconds((*ms).max(1) as i64),
        Schedule::Daily { hour, minute } => {
            let local = after.with_timezone(&offset);
            let candidate = offset
                .with_ymd_and_hms(local.year(), local.month(), local.day(), *hour, *minute, 0)
                .single();
            match candidate {
                Some(candidate) if candidate.with_timezone(&Utc) > after => {
                    candidate.with_timezone(&Utc)
                }
                Some(candidate) => (candidate + chrono::Duration::days(1)).with_timezone(&Utc),
                None => after + chrono::Duration::days(1),
            }
        }
        Schedule::Weekly {
            weekday,
            hour,
            minute,
        } => {
            let local = after.with_timezone(&offset);
            let days_ahead = (weekday.num_days_from_monday() as i64
                - local.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            let date = local.date_naive() + chrono::Duration::days(days_ahead);
            let candidate = offset
                .with_ymd_and_hms(date.year(), date.month(), date.day(), *hour, *minute, 0)
                .single();
            match candidate {
                Some(candidate) if candidate.with_timezone(&Utc) > after => {
                    candidate.with_timezone(&Utc)
                }
                Some(candidate) => (candidate + chrono::Duration::days(7)).with_timezone(&Utc),
                None => after + chrono::Duration::days(7),
            }
        }
        Schedule::Once { at } => *at,
        Schedule::Cron { expr } => {
            // Scan minute boundaries; two years bounds pathological
            // expressions.
            let mut cursor = (after + chrono::Duration::minutes(1))
                .with_timezone(&offset)
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or_else(|| after.with_timezone(&offset));
            for _ in 0..(2 * 366 * 24 * 60) {
                if expr.matches(&cursor) {
                    return cursor.with_timezone(&Utc);
                }
                cursor += chrono::Duration::minutes(1);
            }
            after + chrono::Duration::days(366)
        }
    }
}

/// What a task does when it fires.
pub enum TaskKind {
    /// Delete files in `dir` whose name contains `pattern` and whose age
    /// exceeds `max_age_seconds`, always keeping the `min_files_to_keep`
    /// newest matches.
    Cleanup {
        dir: PathBuf,
        pattern: String,
        max_age_seconds: u64,
        min_files_to_keep: usize,
    },
    /// Compress matching files older than `min_age_days` that are not
    /// already compressed.
    Compression {
        dir: PathBuf,
        pattern: String,
        min_age_days: u64,
        config: CompressionConfig,
    },
    /// Force-rotate the named sink through the rotate hook.
    Rotation { sink_name: String },
    /// Flush the owning logger.
    Flush,
    /// Emit a diagnostics record through the health hook.
    HealthCheck,
    /// Invoke a user callback.
    Custom {
        callback: Arc<dyn Fn() -> Result<()> + Send + Sync>,
    },
}

/// A task registered with the scheduler.
pub struct ScheduledTask {
    pub name: String,
    pub schedule: Schedule,
    pub kind: TaskKind,
    pub enabled: bool,
}

impl ScheduledTask {
    pub fn new(name: &str, schedule: Schedule, kind: TaskKind) -> ScheduledTask {
        ScheduledTask {
            name: name.to_string(),
            schedule,
            kind,
            enabled: true,
        }
    }
}

/// Observable task state.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: usize,
    pub name: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub failure_count: u64,
    pub once_fired: bool,
}

/// Callbacks the scheduler uses to reach the owning logger.
#[derive(Clone, Default)]
pub struct SchedulerHooks {
    pub flush: Option<Arc<dyn Fn() + Send + Sync>>,
    pub rotate: Option<Arc<dyn Fn(&str) -> Result<()> + Send + Sync>>,
    pub health: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_task_error: Option<Arc<dyn Fn(&str, &LogError) + Send + Sync>>,
}

struct TaskState {
    id: usize,
    task: ScheduledTask,
    next_run: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
    failure_count: u64,
    once_fired: bool,
    retries_left: u32,
    running: bool,
}

struct SchedulerShared {
    config: SchedulerConfig,
    offset: FixedOffset,
    tasks: Mutex<Vec<TaskState>>,
    running: AtomicUsize,
    hooks: SchedulerHooks,
    pool: Option<Arc<ThreadPool>>,
    wake: Sender<()>,
}

/// The maintenance scheduler.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    next_id: AtomicUsize,
    driver: Mutex<Option<JoinHandle<()>>>,
    stop: Sender<()>,
}

impl Scheduler {
    pub fn start(
        config: SchedulerConfig,
        hooks: SchedulerHooks,
        pool: Option<Arc<ThreadPool>>,
    ) -> Result<Scheduler> {
        let offset = FixedOffset::east_opt(config.utc_offset_secs).ok_or_else(|| {
            LogError::Configuration(format!(
                "invalid utc offset: {} seconds",
                config.utc_offset_secs
            ))
        })?;
        let (stop, stop_rx) = bounded::<()>(1);
        let (wake, wake_rx) = bounded::<()>(1);
        let shared = Arc::new(SchedulerShared {
            config,
            offset,
            tasks: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            hooks,
            pool,
            wake,
        });
        let driver = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("blazelog-scheduler".to_string())
                .spawn(move || driver_loop(shared, stop_rx, wake_rx))
                .map_err(|e| LogError::Configuration(format!("failed to spawn scheduler: {}", e)))?
        };
        Ok(Scheduler {
            shared,
            next_id: AtomicUsize::new(1),
            driver: Mutex::new(Some(driver)),
            stop,
        })
    }

    /// Registers a task and returns its id.
    pub fn add_task(&self, task: ScheduledTask) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let next_run = match &task.schedule {
            // A pending `Once` in the past still fires, immediately.
            Schedule::Once { at } => *at,
            schedule => next_run_after(schedule, Utc::now(), self.shared.offset),
        };
        let max_retries = self.shared.config.max_retries;
        self.shared.tasks.lock().push(TaskState {
            id,
            task,
            next_run,
            last_run: None,
            run_count: 0,
            failure_count: 0,
            once_fired: false,
            retries_left: max_retries,
            running: false,
        });
        let _ = self.shared.wake.try_send(());
        id
    }

    pub fn set_enabled(&self, id: usize, enabled: bool) -> bool {
        let mut tasks = self.shared.tasks.lock();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(state) => {
                state.task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn remove_task(&self, id: usize) -> bool {
        let mut tasks = self.shared.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        tasks.len() != before
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.shared
            .tasks
            .lock()
            .iter()
            .map(|state| TaskSnapshot {
                id: state.id,
                name: state.task.name.clone(),
                enabled: state.task.enabled,
                last_run: state.last_run,
                next_run: state.next_run,
                run_count: state.run_count,
                failure_count: state.failure_count,
                once_fired: state.once_fired,
            })
            .collect()
    }

    /// Stops the driver and waits for in-flight tasks, bounded by `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.join();
        }
        let deadline = Instant::now() + timeout;
        while self.shared.running.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return Err(LogError::ShutdownTimeout("scheduler"));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

fn driver_loop(shared: Arc<SchedulerShared>, stop: Receiver<()>, wake: Receiver<()>) {
    loop {
        let now = Utc::now();
        let due: Vec<usize> = {
            let mut tasks = shared.tasks.lock();
            let max = shared.config.max_concurrent_tasks;
            let mut picked = Vec::new();
            for state in tasks.iter_mut() {
                if !state.task.enabled || state.running || state.once_fired {
                    continue;
                }
                if state.next_run > now {
                    continue;
                }
                if shared.running.load(Ordering::Acquire) + picked.len() >= max {
                    break;
                }
                state.running = true;
                picked.push(state.id);
            }
            picked
        };

        for id in due {
            shared.running.fetch_add(1, Ordering::AcqRel);
            let task_shared = Arc::clone(&shared);
            let run = move || execute_task(task_shared, id);
            let submitted = match &shared.pool {
                Some(pool) => pool.submit(Priority::Normal, run.clone()).is_ok(),
                None => false,
            };
            if !submitted {
                run();
            }
        }

        // Sleep until the earliest next_run or the check interval.
        let check = Duration::from_millis(shared.config.check_interval_ms.max(1));
        let sleep = {
            let tasks = shared.tasks.lock();
            tasks
                .iter()
                .filter(|t| t.task.enabled && !t.running && !t.once_fired)
                .map(|t| t.next_run)
                .min()
                .map(|next| {
                    let now = Utc::now();
                    if next <= now {
                        Duration::from_millis(1)
                    } else {
                        (next - now).to_std().unwrap_or(check).min(check)
                    }
                })
                .unwrap_or(check)
        };
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(wake) -> _ => {}
            default(sleep) => {}
        }
    }
}

fn execute_task(shared: Arc<SchedulerShared>, id: usize) {
    let result = {
        let tasks = shared.tasks.lock();
        let Some(state) = tasks.iter().find(|t| t.id == id) else {
            shared.running.fetch_sub(1, Ordering::AcqRel);
            return;
        };
        let kind_result = run_kind_prepare(&state.task.kind);
        drop(tasks);
        kind_result(&shared.hooks)
    };

    let now = Utc::now();
    let mut tasks = shared.tasks.lock();
    if let Some(state) = tasks.iter_mut().find(|t| t.id == id) {
        state.running = false;
        state.last_run = Some(now);
        match result {
            Ok(()) => {
                state.run_count += 1;
                state.retries_left = shared.config.max_retries;
                match &state.task.schedule {
                    Schedule::Once { .. } => state.once_fired = true,
                    schedule => state.next_run = next_run_after(schedule, now, shared.offset),
                }
            }
            Err(err) => {
                state.failure_count += 1;
                if let Some(on_task_error) = &shared.hooks.on_task_error {
                    on_task_error(&state.task.name, &err);
                }
                if shared.config.retry_failed && state.retries_left > 0 {
                    state.retries_left -= 1;
                    state.next_run =
                        now + chrono::Duration::milliseconds(shared.config.retry_delay_ms as i64);
                } else {
                    state.retries_left = shared.config.max_retries;
                    match &state.task.schedule {
                        // A failed once-task is spent after its retries.
                        Schedule::Once { .. } => state.once_fired = true,
                        schedule => {
                            state.next_run = next_run_after(schedule, now, shared.offset)
                        }
                    }
                }
            }
        }
    }
    drop(tasks);
    shared.running.fetch_sub(1, Ordering::AcqRel);
    let _ = shared.wake.try_send(());
}

// Clones what the task body needs out of the kind so the tasks lock is not
// held across execution.
fn run_kind_prepare(kind: &TaskKind) -> Box<dyn FnOnce(&SchedulerHooks) -> Result<()> + Send> {
    match kind {
        TaskKind::Cleanup {
            dir,
            pattern,
            max_age_seconds,
            min_files_to_keep,
        } => {
            let dir = dir.clone();
            let pattern = pattern.clone();
            let max_age = *max_age_seconds;
            let keep = *min_files_to_keep;
            Box::new(move |_hooks| run_cleanup(&dir, &pattern, max_age, keep))
        }
        TaskKind::Compression {
            dir,
            pattern,
            min_age_days,
            config,
        } => {
            let dir = dir.clone();
            let pattern = pattern.clone();
            let min_age = *min_age_days;
            let config = config.clone();
            Box::new(move |_hooks| run_compression(&dir, &pattern, min_age, &config))
        }
        TaskKind::Rotation { sink_name } => {
            let sink_name = sink_name.clone();
            Box::new(move |hooks| match &hooks.rotate {
                Some(rotate) => rotate(&sink_name),
                None => Err(LogError::Scheduler(format!(
                    "no rotate hook for sink '{}'",
                    sink_name
                ))),
            })
        }
        TaskKind::Flush => Box::new(|hooks| {
            if let Some(flush) = &hooks.flush {
                flush();
            }
            Ok(())
        }),
        TaskKind::HealthCheck => Box::new(|hooks| {
            if let Some(health) = &hooks.health {
                health();
            }
            Ok(())
        }),
        TaskKind::Custom { callback } => {
            let callback = Arc::clone(callback);
            Box::new(move |_hooks| callback())
        }
    }
}

fn run_cleanup(dir: &std::path::Path, pattern: &str, max_age_seconds: u64, keep: usize) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LogError::Scheduler(format!("cleanup read_dir {:?}: {}", dir, e)))?;
    let mut matches: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains(pattern) {
            continue;
        }
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        matches.push((mtime, path));
    }
    matches.sort_by(|a, b| b.0.cmp(&a.0));
    let cutoff = std::time::SystemTime::now() - Duration::from_secs(max_age_seconds);
    for (mtime, path) in matches.into_iter().skip(keep) {
        if mtime < cutoff {
            let _ = std::fs::remove_file(path);
        }
    }
    Ok(())
}

fn run_compression(
    dir: &std::path::Path,
    pattern: &str,
    min_age_days: u64,
    config: &CompressionConfig,
) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LogError::Scheduler(format!("compression read_dir {:?}: {}", dir, e)))?;
    let cutoff = std::time::SystemTime::now() - Duration::from_secs(min_age_days * 24 * 3600);
    let compressed_suffix = format!(".{}", config.extension);
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains(pattern) || name.ends_with(&compressed_suffix) {
            continue;
        }
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|mtime| mtime < cutoff)
            .unwrap_or(false);
        if !old_enough {
            continue;
        }
        compress_file(&path, None, config, &CompressionCallbacks::default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_daily_boundary_just_before() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let t = utc(2024, 5, 10, 1, 59, 59) + chrono::Duration::milliseconds(900);
        let next = next_run_after(&Schedule::Daily { hour: 2, minute: 0 }, t, offset);
        assert_eq!(next, utc(2024, 5, 10, 2, 0, 0));
        assert_eq!((next - t).num_milliseconds(), 100);
    }

    #[test]
    fn test_daily_boundary_just_after_rolls_to_tomorrow() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let t = utc(2024, 5, 10, 2, 0, 0);
        let next = next_run_after(&Schedule::Daily { hour: 2, minute: 0 }, t, offset);
        assert_eq!(next, utc(2024, 5, 11, 2, 0, 0));
    }

    #[test]
    fn test_daily_respects_offset() {
        // UTC+2: local 02:00 is 00:00 UTC.
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let t = utc(2024, 5, 10, 22, 30, 0);
        let next = next_run_after(&Schedule::Daily { hour: 2, minute: 0 }, t, offset);
        assert_eq!(next, utc(2024, 5, 11, 0, 0, 0));
    }

    #[test]
    fn test_weekly_next_occurrence() {
        let offset = FixedOffset::east_opt(0).unwrap();
        // 2024-05-10 is a Friday.
        let t = utc(2024, 5, 10, 12, 0, 0);
        let next = next_run_after(
            &Schedule::Weekly {
                weekday: Weekday::Mon,
                hour: 9,
                minute: 30,
            },
            t,
            offset,
        );
        assert_eq!(next, utc(2024, 5, 13, 9, 30, 0));
        // Same weekday later hour stays today.
        let next = next_run_after(
            &Schedule::Weekly {
                weekday: Weekday::Fri,
                hour: 13,
                minute: 0,
            },
            t,
            offset,
        );
        assert_eq!(next, utc(2024, 5, 10, 13, 0, 0));
        // Same weekday earlier hour rolls a week.
        let next = next_run_after(
            &Schedule::Weekly {
                weekday: Weekday::Fri,
                hour: 11,
                minute: 0,
            },
            t,
            offset,
        );
        assert_eq!(next, utc(2024, 5, 17, 11, 0, 0));
    }

    #[test]
    fn test_interval_schedule() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let t = utc(2024, 1, 1, 0, 0, 0);
        let next = next_run_after(&Schedule::Interval { ms: 1500 }, t, offset);
        assert_eq!((next - t).num_milliseconds(), 1500);
    }

    #[test]
    fn test_cron_parse_and_next() {
        let expr = CronExpr::parse("*/15 3 * * *").unwrap();
        let offset = FixedOffset::east_opt(0).unwrap();
        let t = utc(2024, 5, 10, 3, 16, 0);
        let next = next_run_after(&Schedule::Cron { expr }, t, offset);
        assert_eq!(next, utc(2024, 5, 10, 3, 30, 0));

        let expr = CronExpr::parse("0 0 1 * *").unwrap();
        let next = next_run_after(&Schedule::Cron { expr }, t, offset);
        assert_eq!(next, utc(2024, 6, 1, 0, 0, 0));
    }

    #[test]
    fn test_cron_rejects_malformed() {
        assert!(CronExpr::parse("* * *").is_err());
        assert!(CronExpr::parse("x * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn test_interval_task_runs_repeatedly() {
        let scheduler = Scheduler::start(
            SchedulerConfig {
                check_interval_ms: 5,
                ..Default::default()
            },
            SchedulerHooks::default(),
            None,
        )
        .unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler.add_task(ScheduledTask::new(
            "tick",
            Schedule::Interval { ms: 10 },
            TaskKind::Custom {
                callback: Arc::new(move || {
                    task_counter.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }),
            },
        ));
        std::thread::sleep(Duration::from_millis(200));
        scheduler.shutdown(Duration::from_secs(5)).unwrap();
        let runs = counter.load(Ordering::Acquire);
        assert!(runs >= 3, "task ran {} times", runs);
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot[0].run_count as u32, runs);
        assert_eq!(snapshot[0].failure_count, 0);
    }

    #[test]
    fn test_once_task_fires_single_time() {
        let scheduler = Scheduler::start(
            SchedulerConfig {
                check_interval_ms: 5,
                ..Default::default()
            },
            SchedulerHooks::default(),
            None,
        )
        .unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler.add_task(ScheduledTask::new(
            "one-shot",
            Schedule::Once { at: Utc::now() },
            TaskKind::Custom {
                callback: Arc::new(move || {
                    task_counter.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }),
            },
        ));
        std::thread::sleep(Duration::from_millis(150));
        scheduler.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::Acquire), 1);
        assert!(scheduler.snapshot()[0].once_fired);
    }

    #[test]
    fn test_interval_first_run_is_one_period_out() {
        let scheduler = Scheduler::start(
            SchedulerConfig {
                check_interval_ms: 5,
                ..Default::default()
            },
            SchedulerHooks::default(),
            None,
        )
        .unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler.add_task(ScheduledTask::new(
            "distant",
            Schedule::Interval { ms: 100_000 },
            TaskKind::Custom {
                callback: Arc::new(move || {
                    task_counter.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }),
            },
        ));
        std::thread::sleep(Duration::from_millis(100));
        scheduler.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_failed_once_task_retries() {
        let scheduler = Scheduler::start(
            SchedulerConfig {
                check_interval_ms: 5,
                retry_failed: true,
                retry_delay_ms: 10,
                max_retries: 2,
                ..Default::default()
            },
            SchedulerHooks::default(),
            None,
        )
        .unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let task_attempts = Arc::clone(&attempts);
        scheduler.add_task(ScheduledTask::new(
            "failing-once",
            Schedule::Once { at: Utc::now() },
            TaskKind::Custom {
                callback: Arc::new(move || {
                    task_attempts.fetch_add(1, Ordering::AcqRel);
                    Err(LogError::Scheduler("always fails".into()))
                }),
            },
        ));
        std::thread::sleep(Duration::from_millis(500));
        scheduler.shutdown(Duration::from_secs(5)).unwrap();
        // Initial attempt plus two retries, then spent.
        assert_eq!(attempts.load(Ordering::Acquire), 3);
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot[0].failure_count, 3);
        assert!(snapshot[0].once_fired);
    }

    #[test]
    fn test_rotation_task_uses_hook() {
        let rotated = Arc::new(Mutex::new(Vec::new()));
        let hook_rotated = Arc::clone(&rotated);
        let hooks = SchedulerHooks {
            rotate: Some(Arc::new(move |name: &str| {
                hook_rotated.lock().push(name.to_string());
                Ok(())
            })),
            ..Default::default()
        };
        let scheduler = Scheduler::start(
            SchedulerConfig {
                check_interval_ms: 5,
                ..Default::default()
            },
            hooks,
            None,
        )
        .unwrap();
        scheduler.add_task(ScheduledTask::new(
            "rotate-app",
            Schedule::Once { at: Utc::now() },
            TaskKind::Rotation {
                sink_name: "app-file".into(),
            },
        ));
        std::thread::sleep(Duration::from_millis(150));
        scheduler.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(rotated.lock().as_slice(), &["app-file".to_string()]);
    }

    #[test]
    fn test_cleanup_task_respects_min_keep() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            let path = dir.path().join(format!("app.2020-01-0{}.log", i + 1));
            std::fs::write(&path, "old").unwrap();
            let ancient = std::time::SystemTime::now() - Duration::from_secs(3600 * 24 * 365);
            if let Ok(file) = std::fs::OpenOptions::new().write(true).open(&path) {
                let _ = file.set_modified(ancient);
            }
        }
        run_cleanup(dir.path(), "app.", 24 * 3600, 2).unwrap();
        let left = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(left, 2);
    }

    #[test]
    fn test_compression_task_compresses_old_matches() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("app.2020-01-01.log");
        std::fs::write(&old, "compress me please, lots of text text text").unwrap();
        let ancient = std::time::SystemTime::now() - Duration::from_secs(3600 * 24 * 30);
        if let Ok(file) = std::fs::OpenOptions::new().write(true).open(&old) {
            let _ = file.set_modified(ancient);
        }
        let fresh = dir.path().join("app.log");
        std::fs::write(&fresh, "too new").unwrap();

        run_compression(dir.path(), "app.", 7, &CompressionConfig::default()).unwrap();
        assert!(dir.path().join("app.2020-01-01.log.gz").exists());
        assert!(!old.exists());
        // The fresh file is untouched.
        assert!(fresh.exists());
        assert!(!dir.path().join("app.log.gz").exists());
    }
}
