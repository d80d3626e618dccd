//! Coastline - call-tracing profiler with per-thread buffered trace logs
//!
//! This library records the timing of every call, line and return that
//! happens while a profiled function runs, buffers the resulting trace per
//! thread, and appends it to a log file when the invocation was slow enough
//! to be interesting. The `coastline` binary scans such logs for slow calls.

pub mod analyzer;
pub mod buffer;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod function;
pub mod hook;
pub mod profiler;
pub mod sink;

pub use config::{ProfilerConfig, TargetSpec};
pub use dispatch::{EventDispatcher, EventKind, Frame};
pub use error::{Result, TraceError};
pub use function::{CodeId, FunctionIdentity, Target};
pub use profiler::{Outcome, Profiler, Session};
pub use sink::{SinkStats, TraceSink};
