pub mod codec;

use std::fmt;

use serde::{Deserialize, Serialize};

/// EventKind identifies what a measurement counts.
/// The wire symbol is fixed by the line format (`t` / `c`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Timer,
    Counter,
}

impl EventKind {
    /// Returns the single-character symbol written on the wire.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Timer => "t",
            Self::Counter => "c",
        }
    }

    /// Convert from the wire symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "t" => Some(Self::Timer),
            "c" => Some(Self::Counter),
            _ => None,
        }
    }

    /// Returns the label used in rendered output and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind-specific payload of a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// A timed section; `elapsed_time` is in seconds.
    Timer { elapsed_time: f64 },
    /// A plain occurrence count.
    Counter,
}

/// A single measurement emitted by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementEvent {
    /// Seconds since the Unix epoch (or any monotonic origin the clock uses).
    pub timestamp: f64,
    pub tag: String,
    pub measurement: Measurement,
    /// Number of real events this measurement stands for (>= 1).
    pub event_count: u64,
}

impl MeasurementEvent {
    /// Creates a timer measurement.
    pub fn timer(timestamp: f64, tag: impl Into<String>, elapsed_time: f64, event_count: u64) -> Self {
        Self {
            timestamp,
            tag: tag.into(),
            measurement: Measurement::Timer { elapsed_time },
            event_count,
        }
    }

    /// Creates a counter measurement.
    pub fn counter(timestamp: f64, tag: impl Into<String>, event_count: u64) -> Self {
        Self {
            timestamp,
            tag: tag.into(),
            measurement: Measurement::Counter,
            event_count,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.measurement {
            Measurement::Timer { .. } => EventKind::Timer,
            Measurement::Counter => EventKind::Counter,
        }
    }

    /// Elapsed time for timers, `None` for counters.
    pub fn elapsed_time(&self) -> Option<f64> {
        match self.measurement {
            Measurement::Timer { elapsed_time } => Some(elapsed_time),
            Measurement::Counter => None,
        }
    }
}
