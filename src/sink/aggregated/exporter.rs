use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::render::Renderer;

use super::metric::BucketReport;

/// Writes each report through a renderer as soon as it is flushed.
pub struct WriterExporter {
    renderer: Renderer,
    writer: Box<dyn Write + Send>,
    wrote_header: bool,
}

impl WriterExporter {
    pub fn new(renderer: Renderer, writer: Box<dyn Write + Send>) -> Self {
        Self {
            renderer,
            writer,
            wrote_header: false,
        }
    }

    /// Renders to stdout.
    pub fn stdout(renderer: Renderer) -> Self {
        Self::new(renderer, Box::new(std::io::stdout()))
    }

    fn export(&mut self, report: &BucketReport) -> Result<()> {
        if !self.wrote_header {
            self.renderer.write_header(&mut self.writer)?;
            self.wrote_header = true;
        }
        self.renderer
            .write_bucket(report, &mut self.writer)
            .context("rendering bucket")?;
        self.writer.flush().context("flushing writer")
    }
}

impl fmt::Debug for WriterExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterExporter")
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

/// Exporter dispatches flushed bucket reports to their destination.
///
/// Enum dispatch keeps the consumer loop free of trait objects.
#[derive(Debug)]
pub enum Exporter {
    /// Forwards reports to an in-process receiver.
    Channel(mpsc::UnboundedSender<BucketReport>),
    /// One `info!` record per aggregate.
    Tracing,
    /// Renders reports to a writer.
    Writer(WriterExporter),
}

impl Exporter {
    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Channel(_) => "channel",
            Self::Tracing => "tracing",
            Self::Writer(_) => "writer",
        }
    }

    /// Export one bucket report.
    pub fn export(&mut self, report: &BucketReport) -> Result<()> {
        match self {
            Self::Channel(tx) => tx
                .send(report.clone())
                .map_err(|_| anyhow::anyhow!("report receiver dropped")),
            Self::Tracing => {
                for record in &report.aggregates {
                    info!(
                        target: "stopwatch::report",
                        bucket_start = report.start_time,
                        bucket_end = ?report.end_time,
                        tag = %record.tag,
                        kind = %record.kind,
                        count = record.event_count,
                        total = record.total_time,
                        avg = ?record.average,
                        "aggregate"
                    );
                }
                Ok(())
            }
            Self::Writer(w) => w.export(report),
        }
    }

    /// Flush buffered output on shutdown.
    pub fn stop(&mut self) -> Result<()> {
        match self {
            Self::Writer(w) => w.writer.flush().context("flushing writer"),
            Self::Channel(_) | Self::Tracing => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::event::EventKind;
    use crate::render::OutputFormat;
    use crate::sink::aggregated::metric::AggregateRecord;

    /// Writer that appends into a shared buffer so the test can inspect it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn report(start: f64) -> BucketReport {
        BucketReport {
            start_time: start,
            end_time: Some(start + 10.0),
            aggregates: vec![AggregateRecord {
                tag: "cache.miss".to_string(),
                kind: EventKind::Counter,
                event_count: 3,
                total_time: 0.0,
                average: None,
            }],
        }
    }

    #[test]
    fn test_channel_exporter_forwards_report() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut exporter = Exporter::Channel(tx);
        exporter.export(&report(0.0)).expect("send");

        let got = rx.try_recv().expect("report forwarded");
        assert_eq!(got, report(0.0));
    }

    #[test]
    fn test_channel_exporter_errors_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut exporter = Exporter::Channel(tx);
        assert!(exporter.export(&report(0.0)).is_err());
    }

    #[test]
    fn test_writer_exporter_writes_csv_header_once() {
        let buf = SharedBuf::default();
        let renderer = Renderer::new(OutputFormat::Csv);
        let mut exporter = Exporter::Writer(WriterExporter::new(renderer, Box::new(buf.clone())));

        exporter.export(&report(0.0)).expect("export");
        exporter.export(&report(20.0)).expect("export");
        exporter.stop().expect("stop");

        let out = String::from_utf8(buf.0.lock().clone()).expect("utf8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "bucket_start,bucket_end,tag,kind,count,total,avg");
        assert!(lines[1].starts_with("0,10,cache.miss,counter,3,"));
        assert!(lines[2].starts_with("20,30,cache.miss,counter,3,"));
    }
}
