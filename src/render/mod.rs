//! Text renderings of bucket reports.

use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;

use crate::event::EventKind;
use crate::sink::aggregated::metric::{AggregateRecord, BucketReport};

const CSV_HEADER: &str = "bucket_start,bucket_end,tag,kind,count,total,avg";

/// Output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Aligned table per bucket.
    #[default]
    Pretty,
    Csv,
    Json,
}

impl OutputFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Renders bucket reports in one [`OutputFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    format: OutputFormat,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Writes a complete document for `reports`.
    pub fn render<W: Write + ?Sized>(&self, reports: &[BucketReport], out: &mut W) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                if reports.iter().all(BucketReport::is_empty) {
                    return writeln!(out, "no measurements");
                }
                for report in reports.iter().filter(|r| !r.is_empty()) {
                    write_pretty(report, out)?;
                }
                Ok(())
            }
            OutputFormat::Csv => {
                self.write_header(out)?;
                for report in reports {
                    write_csv_rows(report, out)?;
                }
                Ok(())
            }
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, reports).map_err(io::Error::from)?;
                writeln!(out)
            }
        }
    }

    /// Writes the document preamble used before streamed buckets. Only CSV has one.
    pub fn write_header<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match self.format {
            OutputFormat::Csv => writeln!(out, "{CSV_HEADER}"),
            OutputFormat::Pretty | OutputFormat::Json => Ok(()),
        }
    }

    /// Writes one bucket in streaming form. JSON is emitted as one compact line.
    pub fn write_bucket<W: Write + ?Sized>(&self, report: &BucketReport, out: &mut W) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => write_pretty(report, out),
            OutputFormat::Csv => write_csv_rows(report, out),
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, report).map_err(io::Error::from)?;
                writeln!(out)
            }
        }
    }
}

fn write_pretty<W: Write + ?Sized>(report: &BucketReport, out: &mut W) -> io::Result<()> {
    let tag_width = report
        .aggregates
        .iter()
        .map(|r| r.tag.chars().count())
        .max()
        .unwrap_or(0)
        .max("Tag".len())
        + 2;

    writeln!(out)?;
    match report.end_time {
        Some(end) => writeln!(
            out,
            "Bucket {} - {}",
            format_timestamp(report.start_time),
            format_timestamp(end)
        )?,
        None => writeln!(out, "Bucket all")?,
    }
    writeln!(
        out,
        "{:<tag_width$}{:<9}{:>10}    {:>10}    {:>10}",
        "Tag", "Kind", "Count", "Total", "Avg"
    )?;
    for record in &report.aggregates {
        match (record.kind, record.average) {
            (EventKind::Timer, Some(avg)) => writeln!(
                out,
                "{:<tag_width$}{:<9}{:>10}    {:>10.3}    {:>10.3}",
                record.tag, record.kind, record.event_count, record.total_time, avg
            )?,
            _ => writeln!(
                out,
                "{:<tag_width$}{:<9}{:>10}    {:>10}    {:>10}",
                record.tag, record.kind, record.event_count, "-", "-"
            )?,
        }
    }
    Ok(())
}

fn write_csv_rows<W: Write + ?Sized>(report: &BucketReport, out: &mut W) -> io::Result<()> {
    let end = report.end_time.map(|e| e.to_string()).unwrap_or_default();
    for record in &report.aggregates {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            report.start_time,
            end,
            csv_field(&record.tag),
            record.kind,
            record.event_count,
            csv_total(record),
            record.average.map(|a| format!("{a:.6}")).unwrap_or_default(),
        )?;
    }
    Ok(())
}

fn csv_total(record: &AggregateRecord) -> String {
    match record.kind {
        EventKind::Timer => format!("{:.6}", record.total_time),
        EventKind::Counter => String::new(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// RFC 3339 in UTC, falling back to raw seconds outside chrono's range.
fn format_timestamp(secs: f64) -> String {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    match DateTime::from_timestamp(whole as i64, nanos) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => format!("{secs}s"),
    }
}
