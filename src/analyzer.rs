//! Offline analysis of committed trace logs
//!
//! Finds `return` records whose call took longer than a threshold. Lines that
//! don't follow the record schema (blank separators, `call`/`line` records,
//! profiler summaries, foreign text) are skipped, and so are lines that are
//! not valid UTF-8. Only real read errors end the analysis.

use regex::Regex;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

/// Duration above which a call is reported, in milliseconds
pub const DEFAULT_THRESHOLD_MS: f64 = 500.0;

static RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)\s+(\w+)\s+\[([^\]\s]+)\]\s+(\w+)\s+line:(\d+)\s+\w+\s+(\S+)\s+totally\s+([\d.]+)\s+ms\s+coast",
    )
    .expect("record pattern is valid")
});

/// A parsed timed record from the trace log
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    /// Event kind, normally `return`
    pub event: String,
    pub name: String,
    /// Keyword before the location, normally `on`
    pub keyword: String,
    pub line: u32,
    pub path: String,
    pub duration_ms: f64,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, [{}], {}, line:{}, {}, {})",
            self.timestamp_ms, self.event, self.name, self.keyword, self.line, self.path, self.duration_ms
        )
    }
}

/// Parse one log line, returning `None` if it doesn't match the schema
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let caps = RECORD.captures(line)?;
    Some(LogRecord {
        timestamp_ms: caps[1].parse().ok()?,
        event: caps[2].to_string(),
        name: caps[3].to_string(),
        keyword: caps[4].to_string(),
        line: caps[5].parse().ok()?,
        path: caps[6].to_string(),
        duration_ms: caps[7].parse().ok()?,
    })
}

/// Lazy iterator over the records of a log that exceed a threshold
pub struct Analysis<R> {
    reader: R,
    buf: Vec<u8>,
    threshold_ms: f64,
}

impl<R: BufRead> Analysis<R> {
    pub fn new(reader: R, threshold_ms: f64) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            threshold_ms,
        }
    }
}

impl<R: BufRead> Iterator for Analysis<R> {
    type Item = std::io::Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err)),
            }
            let Ok(line) = std::str::from_utf8(&self.buf) else {
                tracing::debug!(bytes = self.buf.len(), "skipping undecodable log line");
                continue;
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(record) = parse_line(line) {
                if record.duration_ms > self.threshold_ms {
                    return Some(Ok(record));
                }
            }
        }
    }
}

/// Open the log at `path` and iterate its records slower than `threshold_ms`
pub fn analyse<P: AsRef<Path>>(path: P, threshold_ms: f64) -> std::io::Result<Analysis<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(Analysis::new(BufReader::new(file), threshold_ms))
}
