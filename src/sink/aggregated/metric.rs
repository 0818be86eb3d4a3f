use serde::Serialize;

use crate::event::EventKind;

use super::aggregate::TagAggregate;
use super::buffer::TimeBucket;

/// One exported `(tag, kind)` series for a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRecord {
    pub tag: String,
    pub kind: EventKind,
    pub event_count: u64,
    /// Sum of elapsed seconds. Zero for counters.
    pub total_time: f64,
    /// `None` for counters.
    pub average: Option<f64>,
}

impl From<&TagAggregate> for AggregateRecord {
    fn from(agg: &TagAggregate) -> Self {
        Self {
            tag: agg.tag().to_string(),
            kind: agg.kind(),
            event_count: agg.event_count(),
            total_time: agg.total_time(),
            average: agg.average(),
        }
    }
}

/// A closed or flushed bucket, ready for export or rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketReport {
    pub start_time: f64,
    /// `None` when the bucket spans the whole run.
    pub end_time: Option<f64>,
    pub aggregates: Vec<AggregateRecord>,
}

impl BucketReport {
    /// Snapshot of a bucket's aggregates in first-seen order.
    pub fn from_bucket(bucket: &TimeBucket) -> Self {
        Self {
            start_time: bucket.start_time,
            end_time: bucket.end_time.is_finite().then_some(bucket.end_time),
            aggregates: bucket.aggregates().iter().map(AggregateRecord::from).collect(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_time.is_none()
    }

    /// Number of aggregates in this report.
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Sum of `event_count` over all aggregates.
    pub fn event_count(&self) -> u64 {
        self.aggregates
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.event_count))
    }
}
