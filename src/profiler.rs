//! Profiler: wraps function invocations in a traced session
//!
//! Each profiled invocation registers the calling thread with the trace sink,
//! enables the instrumentation hook, runs the function and disables the hook
//! again. If the invocation took at least `min_interval_ms`, a summary line is
//! appended and the thread's trace is committed to the log file; otherwise the
//! trace is discarded.
//!
//! ```no_run
//! use coastline::{ProfilerConfig, Profiler, TargetSpec};
//!
//! let profiler = Profiler::new(
//!     ProfilerConfig::new()
//!         .with_target(TargetSpec::new("handle", "src/server.rs", 0))
//!         .with_min_interval_ms(500.0),
//! )?;
//! let answer = profiler.run("handle", || 42);
//! assert_eq!(answer, 42);
//! # Ok::<(), coastline::TraceError>(())
//! ```

use crate::clock::{as_ms, epoch_ms};
use crate::config::ProfilerConfig;
use crate::dispatch::EventDispatcher;
use crate::error::Result;
use crate::hook::{self, HookHandle};
use crate::sink::TraceSink;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

/// Tag identifying the profiler's own summary lines in the log
pub const SUMMARY_TAG: &str = "[PyProfiler]";

/// Format the summary line written after a committed invocation
pub fn format_summary(t_ms: u64, name: &str, coast_ms: f64) -> String {
    format!("{}  {} [{}] totally {} ms coast", t_ms, SUMMARY_TAG, name, coast_ms)
}

/// What happened to a finished session's trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Written to the log file
    Committed { lines: usize, elapsed_ms: f64 },
    /// Faster than the minimum interval; dropped
    Discarded { elapsed_ms: f64 },
}

impl Outcome {
    pub fn elapsed_ms(&self) -> f64 {
        match *self {
            Outcome::Committed { elapsed_ms, .. } | Outcome::Discarded { elapsed_ms } => elapsed_ms,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }
}

/// Entry point for tracing function invocations
pub struct Profiler {
    dispatcher: Arc<EventDispatcher>,
    min_interval_ms: f64,
}

impl Profiler {
    /// Create a profiler on the process-wide sink
    ///
    /// The sink is initialized from the first configuration seen in the
    /// process; later profilers share it, so only their `min_interval_ms`
    /// takes effect.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        let min_interval_ms = config.min_interval_ms;
        let sink = TraceSink::init_global(config)?;
        Ok(Self::build(sink, min_interval_ms))
    }

    /// Create a profiler on its own sink, independent of the process-wide one
    pub fn with_sink(sink: Arc<TraceSink>) -> Self {
        let min_interval_ms = sink.config().min_interval_ms;
        Self::build(sink, min_interval_ms)
    }

    fn build(sink: Arc<TraceSink>, min_interval_ms: f64) -> Self {
        Self {
            dispatcher: Arc::new(EventDispatcher::new(sink)),
            min_interval_ms,
        }
    }

    pub fn sink(&self) -> &Arc<TraceSink> {
        self.dispatcher.sink()
    }

    pub fn min_interval_ms(&self) -> f64 {
        self.min_interval_ms
    }

    /// Start a traced session on the calling thread
    ///
    /// Starting a session while another is open on the same thread restarts
    /// the thread's buffer.
    pub fn session(&self, name: impl Into<Cow<'static, str>>) -> Session<'_> {
        let started = Instant::now();
        self.sink().register();
        let hook = hook::enable(Arc::clone(&self.dispatcher));
        Session {
            profiler: self,
            name: name.into(),
            started,
            hook: Some(hook),
            finished: false,
        }
    }

    /// Run `f` in a traced session and return its result
    ///
    /// Lossy: a failure to write the trace is logged at `error` and dropped,
    /// so the result of `f` always reaches the caller. Use
    /// [`Profiler::try_run`] when the caller must see commit failures. A panic
    /// in `f` propagates after the hook is disabled and the trace committed or
    /// discarded.
    pub fn run<R>(&self, name: impl Into<Cow<'static, str>>, f: impl FnOnce() -> R) -> R {
        let session = self.session(name);
        let value = f();
        if let Err(err) = session.finish() {
            tracing::error!(error = %err, "failed to commit trace");
        }
        value
    }

    /// Like [`Profiler::run`], but a failure to write the trace is returned
    pub fn try_run<R>(&self, name: impl Into<Cow<'static, str>>, f: impl FnOnce() -> R) -> Result<R> {
        let session = self.session(name);
        let value = f();
        session.finish()?;
        Ok(value)
    }

    /// Wrap `f` so that every call to it is profiled under `name`
    ///
    /// Commit failures are only logged, as with [`Profiler::run`].
    pub fn wrap<'a, A, R, F>(&'a self, name: &'static str, f: F) -> impl Fn(A) -> R + 'a
    where
        F: Fn(A) -> R + 'a,
    {
        move |args| self.run(name, || f(args))
    }

    /// Like [`Profiler::wrap`], but each call returns commit failures
    pub fn try_wrap<'a, A, R, F>(&'a self, name: &'static str, f: F) -> impl Fn(A) -> Result<R> + 'a
    where
        F: Fn(A) -> R + 'a,
    {
        move |args| self.try_run(name, || f(args))
    }
}

/// A traced invocation in progress on the current thread
///
/// Finishing (or dropping) the session disables the hook and commits or
/// discards the thread's trace depending on how long the session ran.
#[must_use = "dropping the session ends it immediately"]
pub struct Session<'a> {
    profiler: &'a Profiler,
    name: Cow<'static, str>,
    started: Instant,
    hook: Option<HookHandle>,
    finished: bool,
}

impl Session<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// End the session, returning what happened to its trace
    pub fn finish(mut self) -> Result<Outcome> {
        self.complete()
    }

    fn complete(&mut self) -> Result<Outcome> {
        self.finished = true;
        if let Some(handle) = self.hook.take() {
            hook::disable(handle);
        }

        let elapsed_ms = as_ms(self.started.elapsed());
        let sink = self.profiler.sink();
        if elapsed_ms >= self.profiler.min_interval_ms {
            sink.append(format_summary(epoch_ms(), &self.name, elapsed_ms));
            let lines = sink.commit()?;
            Ok(Outcome::Committed { lines, elapsed_ms })
        } else {
            sink.clean();
            Ok(Outcome::Discarded { elapsed_ms })
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.complete() {
            tracing::error!(session = %self.name, error = %err, "failed to commit trace");
        }
    }
}
