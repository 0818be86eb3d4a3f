//! Assignment of event timestamps to fixed-width time buckets.
//!
//! Buckets open lazily: the first event opens one at its own timestamp, and any
//! later event past the open bucket's `end_time` closes it and opens the next one
//! at that event's timestamp. Boundaries therefore depend only on the interval and
//! the order of timestamps seen, so replaying a stream reproduces them exactly.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::event::MeasurementEvent;

use super::buffer::TimeBucket;

/// Width of a time bucket in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval(f64);

impl Interval {
    /// Infinite width: the whole run lands in a single bucket.
    pub const fn unbounded() -> Self {
        Self(f64::INFINITY)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs as f64)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_secs_f64())
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    pub fn is_unbounded(self) -> bool {
        self.0.is_infinite()
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            f.write_str("unbounded")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

/// Errors from parsing an interval of the form `<integer><unit>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("interval {input:?} must look like <integer><s|m|h>")]
    Malformed { input: String },

    #[error("interval {input:?} has unknown unit {unit:?} (expected s, m or h)")]
    UnknownUnit { input: String, unit: String },

    #[error("interval {input:?} must be positive")]
    Zero { input: String },
}

impl FromStr for Interval {
    type Err = IntervalError;

    /// Parses `10s`, `5m`, `2h`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        if digits.is_empty() {
            return Err(IntervalError::Malformed {
                input: input.to_string(),
            });
        }

        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "" => {
                return Err(IntervalError::Malformed {
                    input: input.to_string(),
                })
            }
            other => {
                return Err(IntervalError::UnknownUnit {
                    input: input.to_string(),
                    unit: other.to_string(),
                })
            }
        };

        let value = digits
            .parse::<u64>()
            .map_err(|_| IntervalError::Malformed {
                input: input.to_string(),
            })?;
        if value == 0 {
            return Err(IntervalError::Zero {
                input: input.to_string(),
            });
        }

        Ok(Self::from_secs(value.saturating_mul(multiplier)))
    }
}

/// Outcome of resolving a timestamp against the open bucket.
#[derive(Debug)]
pub enum Resolution {
    /// The timestamp falls inside the open bucket.
    Current,
    /// A new bucket was opened at the timestamp. `closed` holds the bucket it
    /// replaced, now eligible for flush.
    Opened { closed: Option<TimeBucket> },
    /// The timestamp is earlier than the open bucket's start.
    Late { bucket_start: f64 },
}

/// Reasons an event was not accumulated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccumulateError {
    #[error("event {tag:?} at {timestamp} is earlier than the open bucket starting at {bucket_start}")]
    Late {
        tag: String,
        timestamp: f64,
        bucket_start: f64,
    },

    #[error("event {tag:?} has non-finite timestamp {timestamp}")]
    NonFiniteTimestamp { tag: String, timestamp: f64 },
}

/// Owns the open bucket and decides when it closes.
///
/// Closed buckets are handed back to the caller and never revisited; events older
/// than the open bucket are rejected rather than folded into the wrong window.
#[derive(Debug)]
pub struct BucketIndex {
    interval: Interval,
    current: Option<TimeBucket>,
}

impl BucketIndex {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            current: None,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Resolves the bucket for `timestamp`, rotating if it is past the open one.
    ///
    /// A timestamp equal to the open bucket's `end_time` stays in that bucket.
    pub fn resolve(&mut self, timestamp: f64) -> Resolution {
        let width = self.interval.as_secs_f64();
        let (start_time, end_time) = match &self.current {
            Some(bucket) => (bucket.start_time, bucket.end_time),
            None => {
                self.current = Some(TimeBucket::new(timestamp, width));
                return Resolution::Opened { closed: None };
            }
        };

        if timestamp < start_time {
            return Resolution::Late {
                bucket_start: start_time,
            };
        }
        if timestamp > end_time {
            let closed = self.current.replace(TimeBucket::new(timestamp, width));
            return Resolution::Opened { closed };
        }
        Resolution::Current
    }

    /// Folds an event into its bucket.
    ///
    /// Returns the bucket this event closed, if its timestamp rolled the window.
    pub fn accumulate(
        &mut self,
        event: &MeasurementEvent,
    ) -> Result<Option<TimeBucket>, AccumulateError> {
        if !event.timestamp.is_finite() {
            return Err(AccumulateError::NonFiniteTimestamp {
                tag: event.tag.clone(),
                timestamp: event.timestamp,
            });
        }

        let closed = match self.resolve(event.timestamp) {
            Resolution::Current => None,
            Resolution::Opened { closed } => closed,
            Resolution::Late { bucket_start } => {
                return Err(AccumulateError::Late {
                    tag: event.tag.clone(),
                    timestamp: event.timestamp,
                    bucket_start,
                });
            }
        };

        if let Some(bucket) = self.current.as_mut() {
            bucket.add(event);
        }

        Ok(closed)
    }

    /// The open bucket, if any event has been seen.
    pub fn current(&self) -> Option<&TimeBucket> {
        self.current.as_ref()
    }

    /// Moves the open bucket's aggregates out, leaving an empty bucket with the
    /// same boundaries in place. Returns `None` when nothing is pending.
    pub fn drain_current(&mut self) -> Option<TimeBucket> {
        let bucket = self.current.as_mut()?;
        if bucket.is_empty() {
            return None;
        }
        let empty = TimeBucket::new(bucket.start_time, self.interval.as_secs_f64());
        Some(std::mem::replace(bucket, empty))
    }

    /// Removes the open bucket entirely, ending the sequence.
    pub fn take_current(&mut self) -> Option<TimeBucket> {
        self.current.take()
    }
}
