//! Timers, counters and a bucketed aggregation pipeline for their measurements.
//!
//! Producers ([`probe`]) emit [`event::MeasurementEvent`]s into a [`sink::Sink`].
//! Events travel as single text lines ([`event::codec`]) and are folded into
//! fixed-width time buckets either live ([`sink::aggregated::AggregatedSink`])
//! or offline from a log file ([`parser::LogParser`]).

pub mod clock;
pub mod config;
pub mod event;
pub mod parser;
pub mod probe;
pub mod render;
pub mod sink;
