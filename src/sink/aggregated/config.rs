// The aggregator config lives in crate::config so all YAML deserialization
// stays in one place; re-exported here next to the sink that consumes it.
pub use crate::config::AggregatorConfig;
