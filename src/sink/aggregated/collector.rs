use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;

use super::buffer::TimeBucket;
use super::metric::{AggregateRecord, BucketReport};

/// Field an aggregate table is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Tag,
    Count,
    Total,
    Avg,
}

impl SortKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Count => "count",
            Self::Total => "total",
            Self::Avg => "avg",
        }
    }

    fn compare(self, a: &AggregateRecord, b: &AggregateRecord) -> Ordering {
        match self {
            Self::Tag => a.tag.cmp(&b.tag),
            Self::Count => a.event_count.cmp(&b.event_count),
            Self::Total => a.total_time.total_cmp(&b.total_time),
            // Counters have no average and order before every timer.
            Self::Avg => match (a.average, b.average) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (x, y) => x.is_some().cmp(&y.is_some()),
            },
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Sort key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub key: SortKey,
    pub reverse: bool,
}

impl SortSpec {
    pub fn new(key: SortKey, reverse: bool) -> Self {
        Self { key, reverse }
    }

    /// Stable sort. Records that compare equal keep their incoming order in
    /// both directions.
    pub fn apply(&self, records: &mut [AggregateRecord]) {
        let key = self.key;
        if self.reverse {
            records.sort_by(|a, b| key.compare(b, a));
        } else {
            records.sort_by(|a, b| key.compare(a, b));
        }
    }
}

/// Collector turns time buckets into ordered reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct Collector {
    sort: SortSpec,
}

impl Collector {
    pub fn new(sort: SortSpec) -> Self {
        Self { sort }
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    /// Snapshots the bucket and orders its aggregates.
    pub fn collect(&self, bucket: &TimeBucket) -> BucketReport {
        let mut report = BucketReport::from_bucket(bucket);
        self.sort.apply(&mut report.aggregates);
        report
    }
}
