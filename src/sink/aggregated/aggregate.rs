use crate::event::{EventKind, MeasurementEvent};

/// Running count/total for one `(tag, kind)` series inside one time bucket.
///
/// Aggregates only grow; there is no removal. The average is derived from
/// `total_time` and `event_count` on every read, so it can never drift from them.
#[derive(Debug, Clone, PartialEq)]
pub struct TagAggregate {
    tag: String,
    kind: EventKind,
    event_count: u64,
    total_time: f64,
}

impl TagAggregate {
    /// Creates an empty aggregate.
    pub fn new(tag: impl Into<String>, kind: EventKind) -> Self {
        Self {
            tag: tag.into(),
            kind,
            event_count: 0,
            total_time: 0.0,
        }
    }

    /// Folds one measurement into the aggregate.
    ///
    /// Counters only move `event_count`; timers also add their elapsed time.
    /// Overflow saturates, float precision loss is accepted.
    pub fn add(&mut self, event: &MeasurementEvent) {
        self.event_count = self.event_count.saturating_add(event.event_count);
        if let Some(elapsed) = event.elapsed_time() {
            self.total_time += elapsed;
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Sum of elapsed times. Always zero for counters.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Mean elapsed time per event.
    ///
    /// `None` while no events were added, and for counters, which carry no time.
    pub fn average(&self) -> Option<f64> {
        if self.event_count == 0 || self.kind == EventKind::Counter {
            return None;
        }
        Some(self.total_time / self.event_count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_aggregate_total_and_average() {
        let mut agg = TagAggregate::new("db.query", EventKind::Timer);
        for elapsed in [2.0, 3.0, 5.0] {
            agg.add(&MeasurementEvent::timer(0.0, "db.query", elapsed, 1));
        }

        assert_eq!(agg.event_count(), 3);
        assert_eq!(agg.total_time(), 10.0);
        let avg = agg.average().expect("average defined");
        assert!((avg - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_follows_every_add() {
        let mut agg = TagAggregate::new("t", EventKind::Timer);
        agg.add(&MeasurementEvent::timer(0.0, "t", 4.0, 1));
        assert_eq!(agg.average(), Some(4.0));

        agg.add(&MeasurementEvent::timer(0.0, "t", 2.0, 3));
        assert_eq!(agg.event_count(), 4);
        assert_eq!(agg.average(), Some(1.5));
    }

    #[test]
    fn test_counter_aggregate_sums_counts() {
        let mut agg = TagAggregate::new("bar", EventKind::Counter);
        for count in [1, 4, 2] {
            agg.add(&MeasurementEvent::counter(0.0, "bar", count));
        }

        assert_eq!(agg.event_count(), 7);
        assert_eq!(agg.total_time(), 0.0);
        assert_eq!(agg.average(), None);
    }

    #[test]
    fn test_empty_aggregate_has_no_average() {
        let agg = TagAggregate::new("idle", EventKind::Timer);
        assert_eq!(agg.event_count(), 0);
        assert_eq!(agg.average(), None);
    }

    #[test]
    fn test_event_count_saturates() {
        let mut agg = TagAggregate::new("big", EventKind::Counter);
        agg.add(&MeasurementEvent::counter(0.0, "big", u64::MAX));
        agg.add(&MeasurementEvent::counter(0.0, "big", 5));
        assert_eq!(agg.event_count(), u64::MAX);
    }
}
