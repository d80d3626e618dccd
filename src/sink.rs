//! Trace sink: per-thread event ingestion, commit and discard
//!
//! The sink turns call/line/return events into formatted log lines and keeps
//! them in the calling thread's buffer until the profiler decides the traced
//! invocation is worth keeping (`commit`) or not (`clean`).
//!
//! # Lifecycle per thread
//!
//! ```text
//! UNREGISTERED --register--> REGISTERED --commit--> UNREGISTERED (lines written)
//!                                       --clean---> UNREGISTERED (lines dropped)
//! ```
//!
//! Events from threads that never registered (for example helper threads
//! spawned by the traced code) are ignored.
//!
//! # Log line format
//!
//! ```text
//! <epoch_ms>  call   [<name>] on line:<line> of <path>
//! <epoch_ms>  line   [<name>] on line:<line> of <path>
//! <epoch_ms>  return [<name>] on line:<line> of <path> totally <ms> ms coast
//! ```
//!
//! A blank line precedes each `call` that starts a detail-traced block.

use crate::buffer::EventBuffer;
use crate::clock::{as_ms, epoch_ms};
use crate::config::ProfilerConfig;
use crate::error::{Result, TraceError};
use crate::function::{CodeId, FunctionIdentity, Target};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Serializes log file appends across every sink in the process
static COMMIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// The process-wide sink used by [`crate::profiler::Profiler::new`]
static GLOBAL: OnceLock<Arc<TraceSink>> = OnceLock::new();

/// Shared sink coordinating all per-thread trace buffers
pub struct TraceSink {
    config: ProfilerConfig,
    target: Option<Target>,
    buffer: EventBuffer<ThreadId>,
    registered: AtomicU64,
    committed: AtomicU64,
    discarded: AtomicU64,
    orphan_returns: AtomicU64,
}

impl TraceSink {
    /// Create an independent sink
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ProfilerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let target = config
            .target
            .as_ref()
            .map(|spec| Target::new(spec.identity()));
        if let Some(target) = &target {
            tracing::debug!(function = %target.identity(), "line detail enabled for target");
        }
        Self {
            target,
            buffer: EventBuffer::new(capacity),
            config,
            registered: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            orphan_returns: AtomicU64::new(0),
        }
    }

    /// Initialize the process-wide sink, or return it if it already exists
    ///
    /// The first configuration wins. A later call with a different
    /// configuration gets the existing sink and a warning is logged.
    pub fn init_global(config: ProfilerConfig) -> Result<Arc<TraceSink>> {
        config.validate()?;
        let mut pending = Some(config);
        let sink = GLOBAL.get_or_init(|| Arc::new(Self::build(pending.take().unwrap_or_default())));
        if let Some(ignored) = pending {
            if ignored != sink.config {
                tracing::warn!(
                    log_path = %sink.config.log_path.display(),
                    "trace sink already initialized; ignoring new configuration"
                );
            }
        }
        Ok(Arc::clone(sink))
    }

    /// The process-wide sink, if [`TraceSink::init_global`] has run
    pub fn global() -> Result<Arc<TraceSink>> {
        GLOBAL.get().cloned().ok_or(TraceError::NotInitialized)
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn log_path(&self) -> &Path {
        &self.config.log_path
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    fn current() -> ThreadId {
        thread::current().id()
    }

    /// Start buffering for the calling thread, discarding anything it had
    pub fn register(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
        if self.buffer.register(Self::current()) {
            tracing::warn!(
                capacity = self.buffer.capacity(),
                "thread trace buffer full; evicted least recently used thread"
            );
        }
        tracing::debug!(thread = ?Self::current(), "registered thread for tracing");
    }

    pub fn is_registered(&self) -> bool {
        self.buffer.contains(&Self::current())
    }

    fn is_target(&self, identity: &FunctionIdentity) -> bool {
        self.target
            .as_ref()
            .map_or(true, |target| target.matches(identity))
    }

    /// Record entry into `identity`
    pub fn record_call(&self, identity: &FunctionIdentity) {
        let code = call_key(identity);
        self.buffer.with_state(&Self::current(), |state| {
            let started = Instant::now();
            if self.is_target(identity) {
                state.lines.push(String::new());
            }
            state.push_call(code, started);
            state.lines.push(format_call(epoch_ms(), identity));
        });
    }

    /// Record a line executed in `identity`; only the target gets line detail
    pub fn record_line(&self, identity: &FunctionIdentity) {
        let Some(target) = &self.target else {
            return;
        };
        self.buffer.with_state(&Self::current(), |state| {
            if target.matches(identity) {
                state.lines.push(format_line(epoch_ms(), identity));
            }
        });
    }

    /// Record the return from `identity` along with the call's duration
    ///
    /// A return without a matching call (the call was recorded before a
    /// re-registration, or instrumentation started mid-call) is skipped.
    pub fn record_return(&self, identity: &FunctionIdentity) {
        let code = call_key(identity);
        let recorded = self.buffer.with_state(&Self::current(), |state| {
            let Some(started) = state.pop_call(code) else {
                return Err(state.open_calls());
            };
            let coast_ms = as_ms(started.elapsed());
            state.lines.push(format_return(epoch_ms(), identity, coast_ms));
            Ok(())
        });

        if let Some(Err(open_calls)) = recorded {
            self.orphan_returns.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                function = %identity,
                %code,
                open_calls,
                "return without matching call; skipped"
            );
        }
    }

    /// Append a raw line to the calling thread's buffer
    pub fn append(&self, text: impl Into<String>) {
        let text = text.into();
        self.buffer.with_state(&Self::current(), |state| state.lines.push(text));
    }

    /// Write the calling thread's buffered lines to the log file
    ///
    /// The thread's state is removed before writing, so it is cleared whether
    /// or not the write succeeds; a failed write is returned to the caller.
    /// Returns the number of lines written, 0 for an unregistered thread.
    pub fn commit(&self) -> Result<usize> {
        let Some(state) = self.buffer.take(&Self::current()) else {
            return Ok(0);
        };

        {
            let _guard = COMMIT_LOCK.lock();
            append_lines(&self.config.log_path, &state.lines).map_err(|source| {
                TraceError::Commit {
                    path: self.config.log_path.clone(),
                    source,
                }
            })?;
        }

        self.committed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            lines = state.lines.len(),
            open_calls = state.open_calls(),
            path = %self.config.log_path.display(),
            "committed trace"
        );
        Ok(state.lines.len())
    }

    /// Drop the calling thread's buffered lines without writing them
    ///
    /// Returns `false` if the thread was not registered.
    pub fn clean(&self) -> bool {
        let cleaned = self.buffer.take(&Self::current()).is_some();
        if cleaned {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("discarded trace");
        }
        cleaned
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            registered: self.registered.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evicted: self.buffer.evicted(),
            orphan_returns: self.orphan_returns.load(Ordering::Relaxed),
            active_threads: self.buffer.len(),
            capacity: self.buffer.capacity(),
        }
    }
}

/// Counters describing a sink's activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub registered: u64,
    pub committed: u64,
    pub discarded: u64,
    pub evicted: u64,
    pub orphan_returns: u64,
    pub active_threads: usize,
    pub capacity: usize,
}

impl SinkStats {
    /// Fraction of registrations that were lost to eviction (0.0 to 1.0)
    pub fn eviction_rate(&self) -> f64 {
        if self.registered == 0 {
            0.0
        } else {
            self.evicted as f64 / self.registered as f64
        }
    }
}

/// Key pairing a call with its return
fn call_key(identity: &FunctionIdentity) -> CodeId {
    identity
        .code
        .unwrap_or_else(|| CodeId::of(&identity.name, &identity.path, 0))
}

fn append_lines(path: &Path, lines: &[String]) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

pub fn format_call(t_ms: u64, identity: &FunctionIdentity) -> String {
    format!(
        "{}  call   [{}] on line:{} of {}",
        t_ms, identity.name, identity.line, identity.path
    )
}

pub fn format_line(t_ms: u64, identity: &FunctionIdentity) -> String {
    format!(
        "{}  line   [{}] on line:{} of {}",
        t_ms, identity.name, identity.line, identity.path
    )
}

pub fn format_return(t_ms: u64, identity: &FunctionIdentity, coast_ms: f64) -> String {
    format!(
        "{}  return [{}] on line:{} of {} totally {} ms coast",
        t_ms, identity.name, identity.line, identity.path, coast_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetSpec;
    use std::fs;
    use std::sync::Barrier;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sink_in(dir: &TempDir, target: Option<TargetSpec>) -> TraceSink {
        let mut config = ProfilerConfig::new().with_log_path(dir.path().join("trace.txt"));
        config.target = target;
        TraceSink::new(config).unwrap()
    }

    fn read_log(sink: &TraceSink) -> String {
        fs::read_to_string(sink.log_path()).unwrap_or_default()
    }

    fn work() -> FunctionIdentity {
        FunctionIdentity::new("work", "src/work.rs", 3).with_code(CodeId::new(1))
    }

    fn helper() -> FunctionIdentity {
        FunctionIdentity::new("helper", "src/work.rs", 20).with_code(CodeId::new(2))
    }

    #[test]
    fn test_format_lines() {
        let f = FunctionIdentity::new("f", "a.rs", 5);
        assert_eq!(format_call(1000, &f), "1000  call   [f] on line:5 of a.rs");
        assert_eq!(format_line(1000, &f), "1000  line   [f] on line:5 of a.rs");
        assert_eq!(
            format_return(1000, &f, 600.5),
            "1000  return [f] on line:5 of a.rs totally 600.5 ms coast"
        );
    }

    #[test]
    fn test_unregistered_thread_is_noop() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.record_call(&work());
        sink.record_line(&work());
        sink.record_return(&work());
        sink.append("summary");

        assert_eq!(sink.commit().unwrap(), 0);
        assert!(!sink.clean());
        assert!(!sink.log_path().exists());
        assert_eq!(sink.stats().orphan_returns, 0);
    }

    #[test]
    fn test_commit_writes_call_and_return() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.record_call(&work());
        sink.record_return(&work());
        assert_eq!(sink.commit().unwrap(), 3);

        let log = read_log(&sink);
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "");
        assert!(lines[1].ends_with("call   [work] on line:3 of src/work.rs"));
        assert!(lines[2].contains("return [work] on line:3 of src/work.rs totally "));
        assert!(lines[2].ends_with(" ms coast"));
        assert!(!sink.is_registered());
    }

    #[test]
    fn test_no_target_skips_line_detail() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.record_line(&work());
        sink.commit().unwrap();
        assert_eq!(read_log(&sink), "");
    }

    #[test]
    fn test_target_gets_lines_and_separator() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, Some(TargetSpec::new("work", "src/work.rs", 0)));
        assert_eq!(sink.target().unwrap().identity().name, "work");

        sink.register();
        sink.record_call(&work());
        sink.record_line(&FunctionIdentity::new("work", "src/work.rs", 4).with_code(CodeId::new(1)));
        sink.record_call(&helper());
        sink.record_line(&FunctionIdentity::new("helper", "src/work.rs", 21).with_code(CodeId::new(2)));
        sink.record_return(&helper());
        sink.record_return(&work());
        sink.commit().unwrap();

        let log = read_log(&sink);
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "");
        assert!(lines[1].contains("call   [work]"));
        assert!(lines[2].contains("line   [work] on line:4"));
        // helper is not the target: no separator, no line detail
        assert!(lines[3].contains("call   [helper]"));
        assert!(lines[4].contains("return [helper]"));
        assert!(lines[5].contains("return [work]"));
    }

    #[test]
    fn test_exact_line_target() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, Some(TargetSpec::new("work", "src/work.rs", 5)));

        sink.register();
        for line in 4..=6 {
            sink.record_line(&FunctionIdentity::new("work", "src/work.rs", line).with_code(CodeId::new(1)));
        }
        sink.commit().unwrap();

        let log = read_log(&sink);
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("on line:5 of"));
    }

    #[test]
    fn test_return_duration() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.record_call(&work());
        thread::sleep(Duration::from_millis(20));
        sink.record_return(&work());
        sink.commit().unwrap();

        let log = read_log(&sink);
        let coast: f64 = log
            .lines()
            .find(|l| l.contains("return"))
            .and_then(|l| l.split("totally ").nth(1))
            .and_then(|rest| rest.split(' ').next())
            .unwrap()
            .parse()
            .unwrap();
        assert!(coast >= 20.0, "coast was {coast}");
    }

    #[test]
    fn test_orphan_return_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.record_return(&work());
        assert_eq!(sink.stats().orphan_returns, 1);
        assert_eq!(sink.commit().unwrap(), 0);
    }

    #[test]
    fn test_orphan_return_keeps_open_calls() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);
        let other = FunctionIdentity::new("other", "src/other.rs", 1);

        sink.register();
        sink.record_call(&work());
        sink.record_return(&other);
        sink.record_return(&work());
        sink.commit().unwrap();

        assert_eq!(sink.stats().orphan_returns, 1);
        let log = read_log(&sink);
        assert_eq!(log.matches("return [work]").count(), 1);
        assert!(!log.contains("[other]"));
    }

    #[test]
    fn test_recursive_calls_pair_up() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.record_call(&work());
        sink.record_call(&work());
        sink.record_return(&work());
        sink.record_return(&work());
        sink.commit().unwrap();

        let log = read_log(&sink);
        assert_eq!(log.matches("return [work]").count(), 2);
        assert_eq!(sink.stats().orphan_returns, 0);
    }

    #[test]
    fn test_clean_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);
        fs::write(sink.log_path(), "existing\n").unwrap();

        sink.register();
        sink.record_call(&work());
        sink.append("summary");
        assert!(sink.clean());

        assert_eq!(read_log(&sink), "existing\n");
        assert!(!sink.is_registered());
        assert_eq!(sink.stats().discarded, 1);
    }

    #[test]
    fn test_commit_appends() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);
        fs::write(sink.log_path(), "existing\n").unwrap();

        sink.register();
        sink.append("first");
        sink.commit().unwrap();
        sink.register();
        sink.append("second");
        sink.commit().unwrap();

        assert_eq!(read_log(&sink), "existing\nfirst\nsecond\n");
    }

    #[test]
    fn test_commit_failure_is_reported_and_clears_state() {
        let dir = TempDir::new().unwrap();
        let config = ProfilerConfig::new().with_log_path(dir.path().join("missing").join("trace.txt"));
        let sink = TraceSink::new(config).unwrap();

        sink.register();
        sink.append("lost");
        let err = sink.commit().unwrap_err();
        assert!(matches!(err, TraceError::Commit { .. }));
        assert!(!sink.is_registered());
    }

    #[test]
    fn test_threads_are_isolated() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(sink_in(&dir, None));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["alpha", "beta"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let sink = Arc::clone(&sink);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let f = FunctionIdentity::new(name, "src/t.rs", 1).with_code(CodeId::new(i as u64));
                    sink.register();
                    barrier.wait();
                    for _ in 0..50 {
                        sink.record_call(&f);
                        sink.record_return(&f);
                    }
                    barrier.wait();
                    sink.commit().unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 150);
        }

        // Each commit is one contiguous block attributable to one thread
        let log = read_log(&sink);
        let names: Vec<&str> = log
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| if l.contains("[alpha]") { "alpha" } else { "beta" })
            .collect();
        assert_eq!(names.len(), 200);
        let switches = names.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1);
    }

    #[test]
    fn test_eviction_loses_oldest_thread() {
        let dir = TempDir::new().unwrap();
        let config = ProfilerConfig::new()
            .with_log_path(dir.path().join("trace.txt"))
            .with_capacity(1);
        let sink = Arc::new(TraceSink::new(config).unwrap());

        sink.register();
        sink.append("main thread line");

        let other = Arc::clone(&sink);
        thread::spawn(move || {
            other.register();
            other.append("worker line");
            other.commit().unwrap();
        })
        .join()
        .unwrap();

        // The main thread's state was evicted when the worker registered
        assert!(!sink.is_registered());
        assert_eq!(sink.commit().unwrap(), 0);
        assert_eq!(read_log(&sink), "worker line\n");
        assert_eq!(sink.stats().evicted, 1);
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir, None);

        sink.register();
        sink.commit().unwrap();
        sink.register();
        sink.clean();

        let stats = sink.stats();
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.active_threads, 0);
        assert_eq!(stats.capacity, 10_000);
        assert_eq!(stats.eviction_rate(), 0.0);
    }
}
