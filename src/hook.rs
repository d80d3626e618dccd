//! Thread-local instrumentation hook and the probe API that feeds it
//!
//! Tracing is enabled per thread: [`enable`] installs an [`EventDispatcher`]
//! as the calling thread's active hook and returns a [`HookHandle`]. Events
//! are delivered to that dispatcher until the handle is passed to [`disable`]
//! or dropped. Enabling again on the same thread nests; releasing the inner
//! handle makes the outer dispatcher active again.
//!
//! Instrumented code reports its execution through [`enter`]:
//!
//! ```
//! use coastline::hook;
//!
//! fn parse(input: &str) -> usize {
//!     let mut frame = hook::enter(coastline::frame!("parse"));
//!     frame.line(line!());
//!     input.len()
//! }
//! # assert_eq!(parse("abc"), 3);
//! ```
//!
//! Events raised on a thread with no enabled hook are dropped.

use crate::dispatch::{Continuation, EventDispatcher, EventKind, Frame};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;

struct ActiveHook {
    id: u64,
    dispatcher: Arc<EventDispatcher>,
}

thread_local! {
    static HOOKS: RefCell<Vec<ActiveHook>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Proof that a hook is enabled on the current thread
///
/// Not `Send`: a hook can only be released on the thread that enabled it.
#[must_use = "dropping the handle disables the hook"]
#[derive(Debug)]
pub struct HookHandle {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

/// Make `dispatcher` the active hook for the calling thread
pub fn enable(dispatcher: Arc<EventDispatcher>) -> HookHandle {
    let id = NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    HOOKS.with(|hooks| hooks.borrow_mut().push(ActiveHook { id, dispatcher }));
    HookHandle {
        id,
        _not_send: PhantomData,
    }
}

/// Disable the hook identified by `handle`
pub fn disable(handle: HookHandle) {
    drop(handle);
}

impl Drop for HookHandle {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread teardown
        let _ = HOOKS.try_with(|hooks| {
            hooks.borrow_mut().retain(|hook| hook.id != self.id);
        });
    }
}

/// Whether any hook is enabled on the calling thread
pub fn is_enabled() -> bool {
    HOOKS.with(|hooks| !hooks.borrow().is_empty())
}

fn deliver(kind: EventKind, frame: &Frame, line: u32) -> Option<Continuation> {
    let dispatcher = HOOKS
        .try_with(|hooks| hooks.borrow().last().map(|hook| Arc::clone(&hook.dispatcher)))
        .ok()
        .flatten()?;
    Some(dispatcher.dispatch(kind, frame, line))
}

/// An instrumented function's scope; delivers `return` when dropped
#[must_use = "the return event fires when the guard is dropped"]
pub struct FrameGuard {
    frame: Frame,
    line: u32,
    entered: bool,
    stopped: bool,
}

/// Report entry into `frame`
///
/// The return is reported when the guard is dropped, including while
/// unwinding from a panic.
pub fn enter(frame: Frame) -> FrameGuard {
    let entered = deliver(EventKind::Call, &frame, frame.line).is_some();
    FrameGuard {
        line: frame.line,
        frame,
        entered,
        stopped: false,
    }
}

impl FrameGuard {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Report that `line` is about to execute
    pub fn line(&mut self, line: u32) {
        self.line = line;
        if self.entered && !self.stopped {
            self.respond(deliver(EventKind::Line, &self.frame, line));
        }
    }

    /// Report an error propagating through this frame
    ///
    /// A dispatcher answering `Stop` suppresses further line events for the
    /// scope. The closing return is still delivered so the call stays paired.
    pub fn exception(&mut self) {
        if self.entered && !self.stopped {
            self.respond(deliver(EventKind::Exception, &self.frame, self.line));
        }
    }

    fn respond(&mut self, answer: Option<Continuation>) {
        if answer == Some(Continuation::Stop) {
            self.stopped = true;
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.entered {
            let _ = deliver(EventKind::Return, &self.frame, self.line);
        }
    }
}

/// Run `f` as an instrumented function described by `frame`
pub fn traced<R>(frame: Frame, f: impl FnOnce(&mut FrameGuard) -> R) -> R {
    let mut guard = enter(frame);
    f(&mut guard)
}
