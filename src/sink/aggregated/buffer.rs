use std::collections::HashMap;

use crate::event::{EventKind, MeasurementEvent};

use super::aggregate::TagAggregate;

/// One fixed-width aggregation window and the per-tag aggregates it owns.
///
/// A timestamp `t` belongs to the bucket iff `start_time <= t <= end_time`.
/// Aggregates are keyed by `(tag, kind)`, so a timer and a counter sharing a tag
/// stay separate, and are kept in first-seen order.
#[derive(Debug, Clone)]
pub struct TimeBucket {
    /// Start of this aggregation window, in seconds.
    pub start_time: f64,
    /// `start_time + interval`. Infinite for the unbounded window.
    pub end_time: f64,
    aggregates: Vec<TagAggregate>,
    timers: HashMap<String, usize>,
    counters: HashMap<String, usize>,
}

impl TimeBucket {
    /// Creates an empty bucket covering `[start_time, start_time + interval]`.
    pub fn new(start_time: f64, interval: f64) -> Self {
        Self {
            start_time,
            end_time: start_time + interval,
            aggregates: Vec::with_capacity(16),
            timers: HashMap::with_capacity(16),
            counters: HashMap::with_capacity(16),
        }
    }

    /// Whether `timestamp` falls inside the window (both ends inclusive).
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start_time <= timestamp && timestamp <= self.end_time
    }

    /// Adds an event to the aggregate for its `(tag, kind)`, creating it if needed.
    pub fn add(&mut self, event: &MeasurementEvent) {
        let kind = event.kind();
        let index = match kind {
            EventKind::Timer => &mut self.timers,
            EventKind::Counter => &mut self.counters,
        };

        let slot = match index.get(event.tag.as_str()) {
            Some(&slot) => slot,
            None => {
                let slot = self.aggregates.len();
                self.aggregates.push(TagAggregate::new(event.tag.clone(), kind));
                index.insert(event.tag.clone(), slot);
                slot
            }
        };

        self.aggregates[slot].add(event);
    }

    /// Looks up the aggregate for a `(tag, kind)` pair.
    pub fn get(&self, tag: &str, kind: EventKind) -> Option<&TagAggregate> {
        let index = match kind {
            EventKind::Timer => &self.timers,
            EventKind::Counter => &self.counters,
        };
        index.get(tag).map(|&slot| &self.aggregates[slot])
    }

    /// Aggregates in first-seen order.
    pub fn aggregates(&self) -> &[TagAggregate] {
        &self.aggregates
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Drops all aggregates but keeps the window boundaries.
    pub fn clear(&mut self) {
        self.aggregates.clear();
        self.timers.clear();
        self.counters.clear();
    }
}
