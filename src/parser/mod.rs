//! Rebuilds bucketed aggregates from a persisted measurement log.
//!
//! The parser runs the same bucket index as the live aggregator over a finite
//! sequence of lines, so a log replayed here yields the buckets the live path
//! would have flushed. Bad lines are skipped; they never abort a parse.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::codec::{self, ParseError};
use crate::sink::aggregated::collector::{Collector, SortSpec};
use crate::sink::aggregated::metric::BucketReport;
use crate::sink::aggregated::window::{AccumulateError, BucketIndex, Interval};

/// Parser settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Collect and log per-line errors.
    pub verbose: bool,
    pub sort: SortSpec,
    pub interval: Interval,
}

/// Why a line was skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineErrorKind {
    #[error(transparent)]
    Malformed(#[from] ParseError),

    #[error(transparent)]
    Rejected(#[from] AccumulateError),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// A skipped line, reported in verbose mode.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    /// 1-based.
    pub line_number: usize,
    pub line: String,
    pub error: LineErrorKind,
}

/// Result of one parse.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    /// Buckets in time order, each with sorted aggregates.
    pub buckets: Vec<BucketReport>,
    /// Only populated in verbose mode.
    pub errors: Vec<LineError>,
    pub lines_read: usize,
    /// Lines that were folded into a bucket.
    pub measurements: usize,
    /// Lines that carried markers but were skipped.
    pub skipped: usize,
}

/// Offline counterpart of the live aggregator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParser {
    options: ParserOptions,
}

impl LogParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse a log file.
    pub fn parse_path(&self, path: &Path) -> Result<ParseOutcome> {
        let file =
            File::open(path).with_context(|| format!("opening log file {}", path.display()))?;
        self.parse_reader(BufReader::new(file))
            .with_context(|| format!("reading log file {}", path.display()))
    }

    /// Parse from any buffered reader. Only I/O failures are errors.
    pub fn parse_reader<R: BufRead>(&self, mut reader: R) -> Result<ParseOutcome> {
        let mut state = ParseState::new(self.options);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            match std::str::from_utf8(&buf) {
                Ok(line) => state.feed(line),
                Err(_) => {
                    let lossy = String::from_utf8_lossy(&buf);
                    state.skip(&lossy, LineErrorKind::InvalidUtf8);
                }
            }
        }
        Ok(state.finish())
    }

    /// Parse in-memory lines.
    pub fn parse_lines<I, S>(&self, lines: I) -> ParseOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = ParseState::new(self.options);
        for line in lines {
            state.feed(line.as_ref());
        }
        state.finish()
    }
}

struct ParseState {
    verbose: bool,
    index: BucketIndex,
    collector: Collector,
    outcome: ParseOutcome,
}

impl ParseState {
    fn new(options: ParserOptions) -> Self {
        Self {
            verbose: options.verbose,
            index: BucketIndex::new(options.interval),
            collector: Collector::new(options.sort),
            outcome: ParseOutcome::default(),
        }
    }

    fn feed(&mut self, line: &str) {
        self.outcome.lines_read += 1;

        let event = match codec::decode(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                self.record(line, e.into());
                return;
            }
        };

        match self.index.accumulate(&event) {
            Ok(closed) => {
                self.outcome.measurements += 1;
                if let Some(bucket) = closed {
                    self.outcome.buckets.push(self.collector.collect(&bucket));
                }
            }
            Err(e) => self.record(line, e.into()),
        }
    }

    /// Counts a line that could not be read at all.
    fn skip(&mut self, line: &str, error: LineErrorKind) {
        self.outcome.lines_read += 1;
        self.record(line, error);
    }

    fn record(&mut self, line: &str, error: LineErrorKind) {
        self.outcome.skipped += 1;
        if !self.verbose {
            return;
        }

        let line_number = self.outcome.lines_read;
        let line = line.trim().to_string();
        warn!(line_number, line = %line, error = %error, "skipping line");
        self.outcome.errors.push(LineError {
            line_number,
            line,
            error,
        });
    }

    fn finish(mut self) -> ParseOutcome {
        if let Some(bucket) = self.index.take_current() {
            if !bucket.is_empty() {
                self.outcome.buckets.push(self.collector.collect(&bucket));
            }
        }

        debug!(
            lines = self.outcome.lines_read,
            measurements = self.outcome.measurements,
            skipped = self.outcome.skipped,
            buckets = self.outcome.buckets.len(),
            "parse finished"
        );
        self.outcome
    }
}
