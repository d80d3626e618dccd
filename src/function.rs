//! Function identities and target matching
//!
//! A [`FunctionIdentity`] describes the code executing when a trace event
//! fires: its name, defining source path, the line the event refers to and,
//! when the instrumentation knows it, an opaque [`CodeId`] for the code object.
//!
//! Matching a traced frame against the configured detail target is done by a
//! [`Target`], which resolves the target's code identity on the first
//! structural match and memoizes it, so later checks compare a single integer.

use fnv::FnvHasher;
use std::borrow::Cow;
use std::fmt;
use std::hash::Hasher;
use std::sync::OnceLock;

/// Stable per-code-object identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeId(u64);

impl CodeId {
    /// Wrap a raw identity supplied by the instrumentation
    pub const fn new(raw: u64) -> Self {
        CodeId(raw)
    }

    /// Derive an identity from a function's name, path and definition line
    ///
    /// FNV-1a keeps this stable across runs and platforms.
    pub fn of(name: &str, path: &str, def_line: u32) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(name.as_bytes());
        hasher.write_u8(0);
        hasher.write(path.as_bytes());
        hasher.write_u8(0);
        hasher.write_u32(def_line);
        CodeId(hasher.finish())
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Descriptor of a callable as seen by a trace event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    /// Function name
    pub name: Cow<'static, str>,
    /// Defining source path
    pub path: Cow<'static, str>,
    /// Line number (0 acts as a wildcard when used as a pattern)
    pub line: u32,
    /// Code object identity, if known
    pub code: Option<CodeId>,
}

impl FunctionIdentity {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        path: impl Into<Cow<'static, str>>,
        line: u32,
    ) -> Self {
        FunctionIdentity {
            name: name.into(),
            path: path.into(),
            line,
            code: None,
        }
    }

    pub fn with_code(mut self, code: CodeId) -> Self {
        self.code = Some(code);
        self
    }

    /// Check whether `other` is the function this identity describes
    ///
    /// Identical code identities match immediately. Otherwise name and path
    /// must be equal, and the line must be equal unless `self.line` is 0.
    pub fn matches(&self, other: &FunctionIdentity) -> bool {
        if let (Some(a), Some(b)) = (self.code, other.code) {
            if a == b {
                return true;
            }
        }
        self.name == other.name
            && self.path == other.path
            && (self.line == 0 || self.line == other.line)
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.path, self.line)
    }
}

/// The detail-traced function, with its resolved code identity memoized
#[derive(Debug)]
pub struct Target {
    identity: FunctionIdentity,
    resolved: OnceLock<CodeId>,
}

impl Target {
    pub fn new(identity: FunctionIdentity) -> Self {
        let resolved = OnceLock::new();
        if let Some(code) = identity.code {
            let _ = resolved.set(code);
        }
        Target { identity, resolved }
    }

    pub fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    /// Code identity learned from the first structural match
    pub fn resolved(&self) -> Option<CodeId> {
        self.resolved.get().copied()
    }

    /// Match a traced frame against the target
    ///
    /// Only wildcard-line targets memoize: an exact-line target must keep
    /// comparing lines, so a code identity alone can't stand in for it.
    pub fn matches(&self, candidate: &FunctionIdentity) -> bool {
        if self.identity.line == 0 {
            if let (Some(resolved), Some(code)) = (self.resolved.get(), candidate.code) {
                if *resolved == code {
                    return true;
                }
            }
        }

        if !self.identity.matches(candidate) {
            return false;
        }
        if self.identity.line == 0 {
            if let Some(code) = candidate.code {
                let _ = self.resolved.set(code);
            }
        }
        true
    }
}

impl From<FunctionIdentity> for Target {
    fn from(identity: FunctionIdentity) -> Self {
        Target::new(identity)
    }
}
