pub mod aggregated;

use std::io::Write;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::event::{codec, MeasurementEvent};

/// Sink receives measurements from producers.
///
/// `log` never fails to the caller; implementations report their own problems.
pub trait Sink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Record one measurement.
    fn log(&self, event: MeasurementEvent);
}

/// Writes one encoded line per event.
pub struct PrintSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl PrintSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Default for PrintSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Sink for PrintSink {
    fn name(&self) -> &str {
        "print"
    }

    fn log(&self, event: MeasurementEvent) {
        let line = match codec::encode(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, tag = %event.tag, "cannot encode measurement");
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}") {
            warn!(error = %e, "failed to write measurement line");
        }
    }
}

/// Emits encoded lines into the application's tracing stream, so measurements
/// can be recovered later from ordinary logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn log(&self, event: MeasurementEvent) {
        match codec::encode(&event) {
            Ok(line) => info!(target: "stopwatch::metrics", "{line}"),
            Err(e) => warn!(error = %e, tag = %event.tag, "cannot encode measurement"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl Sink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn log(&self, _event: MeasurementEvent) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

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

    #[test]
    fn test_print_sink_writes_encoded_lines() {
        let buf = SharedBuf::default();
        let sink = PrintSink::new(Box::new(buf.clone()));

        sink.log(MeasurementEvent::timer(0.0, "test.tag", 1.0, 1));
        sink.log(MeasurementEvent::counter(5.0, "bar", 4));

        let out = String::from_utf8(buf.0.lock().clone()).expect("utf8");
        assert_eq!(out, "<|0|test.tag|1.000000|1|t|>\n<|5|bar|4|c|>\n");
    }

    #[test]
    fn test_print_sink_skips_unencodable_event() {
        let buf = SharedBuf::default();
        let sink = PrintSink::new(Box::new(buf.clone()));

        sink.log(MeasurementEvent::counter(0.0, "bad|tag", 1));
        assert!(buf.0.lock().is_empty());
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(NoopSink),
            Box::new(TracingSink),
            Box::new(PrintSink::new(Box::new(std::io::sink()))),
        ];
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["noop", "tracing", "print"]);
        for sink in &sinks {
            sink.log(MeasurementEvent::counter(0.0, "x", 1));
        }
    }
}
