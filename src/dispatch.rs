//! Routing of raw instrumentation events into the trace sink

use crate::function::{CodeId, FunctionIdentity};
use crate::sink::TraceSink;
use std::sync::Arc;

/// Kind of a raw instrumentation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Function entry
    Call,
    /// A line is about to execute
    Line,
    /// Function exit
    Return,
    /// An error is propagating through the frame
    Exception,
}

/// Whether the hook should keep delivering events for the current scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop,
}

/// Static description of an instrumented function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub name: &'static str,
    pub path: &'static str,
    /// Line the function is defined on
    pub line: u32,
    pub code: CodeId,
}

impl Frame {
    pub fn new(name: &'static str, path: &'static str, line: u32) -> Self {
        Frame {
            name,
            path,
            line,
            code: CodeId::of(name, path, line),
        }
    }

    /// Identity of this frame as seen at `line`
    pub fn identity_at(&self, line: u32) -> FunctionIdentity {
        FunctionIdentity::new(self.name, self.path, line).with_code(self.code)
    }
}

/// Build a [`Frame`] for the enclosing function
///
/// ```
/// let frame = coastline::frame!("parse_header");
/// assert_eq!(frame.name, "parse_header");
/// assert_eq!(frame.path, file!());
/// ```
#[macro_export]
macro_rules! frame {
    ($name:expr) => {
        $crate::dispatch::Frame::new($name, file!(), line!())
    };
}

/// Translates instrumentation events into [`TraceSink`] operations
#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<TraceSink>,
}

impl EventDispatcher {
    pub fn new(sink: Arc<TraceSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<TraceSink> {
        &self.sink
    }

    /// Handle one event for `frame` currently at `line`
    pub fn dispatch(&self, kind: EventKind, frame: &Frame, line: u32) -> Continuation {
        let identity = frame.identity_at(line);
        match kind {
            EventKind::Call => self.sink.record_call(&identity),
            EventKind::Line => self.sink.record_line(&identity),
            EventKind::Return => self.sink.record_return(&identity),
            EventKind::Exception => return Continuation::Stop,
        }
        Continuation::Continue
    }
}
