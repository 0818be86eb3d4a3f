pub mod aggregate;
pub mod buffer;
pub mod collector;
pub mod config;
pub mod exporter;
pub mod metric;
pub mod stats;
pub mod window;

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::MeasurementEvent;
use crate::sink::Sink;

use self::buffer::TimeBucket;
use self::collector::Collector;
use self::config::AggregatorConfig;
use self::exporter::Exporter;
use self::stats::{SharedStats, SinkStats};
use self::window::{AccumulateError, BucketIndex};

/// Events pulled per wakeup before the loop re-checks cancellation and control.
const BATCH_SIZE: usize = 256;

/// Why an event was not queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("aggregator queue is full, event dropped")]
    QueueSaturated,

    #[error("aggregator has shut down")]
    Closed,
}

/// Requests served by the consumer task between events.
enum Control {
    Flush(oneshot::Sender<usize>),
}

/// Live bucketed aggregation over a bounded queue.
///
/// Producers call [`submit`](Self::submit) (or [`Sink::log`]) from any thread;
/// a single consumer task spawned by [`start`](Self::start) owns the bucket
/// index. Buckets are flushed to the registered exporters when a later event
/// closes them, or on an explicit [`flush`](Self::flush).
///
/// Delivery: every closed bucket is exported at most once. Queued events are
/// folded in before the task exits, but the final open bucket is discarded
/// unless `flush` runs before `stop`.
pub struct AggregatedSink {
    cfg: AggregatorConfig,

    /// Event channel sender shared by all producers.
    event_tx: mpsc::Sender<MeasurementEvent>,
    control_tx: mpsc::UnboundedSender<Control>,

    /// Receivers and exporters, taken by `start`.
    pending: Mutex<Option<Pending>>,

    stats: Arc<SharedStats>,

    /// Child of the token passed to `start`; cancelled by `stop`.
    shutdown: Option<CancellationToken>,

    /// Handle for the consumer task.
    run_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

/// Consumer-side state held until `start` moves it into the task.
struct Pending {
    event_rx: mpsc::Receiver<MeasurementEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    exporters: Vec<Exporter>,
}

impl AggregatedSink {
    /// Creates the sink and its queue. Nothing runs until `start`.
    pub fn new(cfg: AggregatorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            cfg,
            event_tx,
            control_tx,
            pending: Mutex::new(Some(Pending {
                event_rx,
                control_rx,
                exporters: Vec::with_capacity(2),
            })),
            stats: Arc::new(SharedStats::default()),
            shutdown: None,
            run_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Registers a flush target. Must be called before `start`.
    pub fn add_exporter(&mut self, exporter: Exporter) {
        match self.pending.get_mut() {
            Some(pending) => pending.exporters.push(exporter),
            None => warn!(
                exporter = exporter.name(),
                "exporter added after start, ignoring"
            ),
        }
    }

    fn is_started(&self) -> bool {
        self.pending.lock().is_none()
    }

    /// Spawns the consumer task. It stops when `ctx` (or `stop`) cancels it.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let Some(Pending {
            mut event_rx,
            mut control_rx,
            exporters,
        }) = self.pending.get_mut().take()
        else {
            bail!("aggregated sink already started");
        };

        let token = ctx.child_token();
        self.shutdown = Some(token.clone());

        let mut consumer = Consumer {
            index: BucketIndex::new(self.cfg.interval()),
            collector: Collector::new(self.cfg.sort_spec()),
            exporters,
            stats: Arc::clone(&self.stats),
        };
        for exporter in &consumer.exporters {
            info!(exporter = exporter.name(), "exporter registered");
        }

        let run_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        let queued = event_rx.len();
                        let drained = consumer.drain(&mut event_rx, queued);
                        debug!(drained, "drained queued events on shutdown");
                        break;
                    }

                    Some(cmd) = control_rx.recv() => match cmd {
                        Control::Flush(ack) => {
                            let queued = event_rx.len();
                            consumer.drain(&mut event_rx, queued);
                            let emitted = consumer.flush();
                            // The caller may have stopped waiting.
                            let _ = ack.send(emitted);
                        }
                    },

                    event = event_rx.recv() => match event {
                        Some(event) => {
                            consumer.accumulate(event);
                            for _ in 1..BATCH_SIZE {
                                match event_rx.try_recv() {
                                    Ok(event) => consumer.accumulate(event),
                                    Err(_) => break,
                                }
                            }
                        }
                        None => break,
                    },
                }
            }

            consumer.stop();
        });
        *self.run_task.lock().await = Some(run_task);

        info!(
            interval = %self.cfg.interval(),
            queue_capacity = self.cfg.queue_capacity,
            sort = %self.cfg.sort,
            "aggregated sink started"
        );

        Ok(())
    }

    /// Queues an event without blocking. A full queue drops the newest event.
    pub fn submit(&self, event: MeasurementEvent) -> Result<(), SubmitError> {
        match self.event_tx.try_send(event) {
            Ok(()) => {
                SharedStats::incr(&self.stats.submitted);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                SharedStats::incr(&self.stats.dropped);
                warn!(tag = %event.tag, "aggregated sink event channel full, dropping event");
                Err(SubmitError::QueueSaturated)
            }
            Err(TrySendError::Closed(event)) => {
                SharedStats::incr(&self.stats.dropped);
                warn!(tag = %event.tag, "aggregated sink closed, dropping event");
                Err(SubmitError::Closed)
            }
        }
    }

    /// Queues an event, blocking the calling thread until there is room.
    ///
    /// For replaying finite input where every event must be counted. Must not
    /// be called from async code; use it from `spawn_blocking` or a plain thread.
    pub fn submit_blocking(&self, event: MeasurementEvent) -> Result<(), SubmitError> {
        match self.event_tx.blocking_send(event) {
            Ok(()) => {
                SharedStats::incr(&self.stats.submitted);
                Ok(())
            }
            Err(mpsc::error::SendError(event)) => {
                SharedStats::incr(&self.stats.dropped);
                warn!(tag = %event.tag, "aggregated sink closed, dropping event");
                Err(SubmitError::Closed)
            }
        }
    }

    /// Exports and clears the open bucket after folding in everything queued so
    /// far. The bucket window stays open. Returns the number of aggregates
    /// emitted, zero when nothing was pending.
    pub async fn flush(&self) -> usize {
        if !self.is_started() {
            debug!("flush before start, nothing to do");
            return 0;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control_tx.send(Control::Flush(ack_tx)).is_err() {
            return 0;
        }
        ack_rx.await.unwrap_or(0)
    }

    /// Cancels the consumer and waits for it to drain and exit.
    pub async fn stop(&self) {
        if let Some(token) = &self.shutdown {
            token.cancel();
        }
        self.wait_for_shutdown().await;
    }

    /// Waits for the consumer task to finish.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "aggregated sink task join failed");
            }
        }
    }

    /// Events currently waiting in the queue.
    pub fn queued_len(&self) -> usize {
        self.event_tx.max_capacity() - self.event_tx.capacity()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.snapshot()
    }
}

impl Sink for AggregatedSink {
    fn name(&self) -> &str {
        "aggregated"
    }

    fn log(&self, event: MeasurementEvent) {
        // Already counted and warned.
        let _ = self.submit(event);
    }
}

/// State owned by the consumer task.
struct Consumer {
    index: BucketIndex,
    collector: Collector,
    exporters: Vec<Exporter>,
    stats: Arc<SharedStats>,
}

impl Consumer {
    fn accumulate(&mut self, event: MeasurementEvent) {
        match self.index.accumulate(&event) {
            Ok(Some(closed)) => {
                self.emit(&closed);
            }
            Ok(None) => {}
            Err(err @ AccumulateError::Late { .. }) => {
                SharedStats::incr(&self.stats.late);
                warn!(error = %err, "dropping late event");
            }
            Err(err @ AccumulateError::NonFiniteTimestamp { .. }) => {
                SharedStats::incr(&self.stats.invalid);
                warn!(error = %err, "dropping invalid event");
            }
        }
    }

    /// Folds in at most `limit` queued events. Callers pass the queue length
    /// seen on entry so concurrent producers cannot keep the drain going.
    fn drain(&mut self, event_rx: &mut mpsc::Receiver<MeasurementEvent>, limit: usize) -> usize {
        let mut drained = 0usize;
        while drained < limit {
            match event_rx.try_recv() {
                Ok(event) => self.accumulate(event),
                Err(_) => break,
            }
            drained += 1;
        }
        drained
    }

    fn flush(&mut self) -> usize {
        match self.index.drain_current() {
            Some(bucket) => self.emit(&bucket),
            None => 0,
        }
    }

    fn emit(&mut self, bucket: &TimeBucket) -> usize {
        if bucket.is_empty() {
            return 0;
        }

        let report = self.collector.collect(bucket);
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.export(&report) {
                tracing::error!(
                    exporter = exporter.name(),
                    error = %e,
                    "bucket export failed",
                );
            }
        }
        SharedStats::incr(&self.stats.flushed_buckets);

        debug!(
            bucket_start = report.start_time,
            aggregates = report.len(),
            events = report.event_count(),
            "bucket flushed"
        );
        report.len()
    }

    fn stop(&mut self) {
        if let Some(pending) = self.index.take_current().filter(|b| !b.is_empty()) {
            warn!(
                bucket_start = pending.start_time,
                aggregates = pending.len(),
                "discarding unflushed bucket on shutdown"
            );
        }

        for exporter in &mut self.exporters {
            if let Err(e) = exporter.stop() {
                tracing::error!(
                    exporter = exporter.name(),
                    error = %e,
                    "exporter stop failed",
                );
            }
        }

        let stats = self.stats.snapshot();
        info!(
            submitted = stats.submitted,
            dropped = stats.dropped,
            late = stats.late,
            invalid = stats.invalid,
            flushed_buckets = stats.flushed_buckets,
            "aggregated sink stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::EventKind;
    use crate::sink::aggregated::metric::BucketReport;
    use crate::sink::aggregated::window::Interval;

    fn config(queue_capacity: usize, interval_secs: Option<u64>) -> AggregatorConfig {
        AggregatorConfig {
            queue_capacity,
            interval: interval_secs.map(Duration::from_secs),
            ..AggregatorConfig::default()
        }
    }

    async fn started(
        cfg: AggregatorConfig,
    ) -> (AggregatedSink, mpsc::UnboundedReceiver<BucketReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = AggregatedSink::new(cfg);
        sink.add_exporter(Exporter::Channel(tx));
        sink.start(CancellationToken::new()).await.expect("start");
        (sink, rx)
    }

    #[test]
    fn test_queue_is_capped_without_consumer() {
        let sink = AggregatedSink::new(config(4, None));
        let mut saturated = 0;
        for i in 0..10 {
            if sink.submit(MeasurementEvent::counter(i as f64, "load", 1))
                == Err(SubmitError::QueueSaturated)
            {
                saturated += 1;
            }
        }

        assert_eq!(sink.queued_len(), 4);
        assert_eq!(saturated, 6);
        let stats = sink.stats();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.dropped, 6);
    }

    #[test]
    fn test_log_never_fails_when_full() {
        let sink = AggregatedSink::new(config(1, None));
        sink.log(MeasurementEvent::counter(0.0, "a", 1));
        sink.log(MeasurementEvent::counter(0.0, "a", 1));
        assert_eq!(sink.queued_len(), 1);
        assert_eq!(sink.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_flush_before_start_is_noop() {
        let sink = AggregatedSink::new(config(8, None));
        sink.submit(MeasurementEvent::counter(0.0, "a", 1))
            .expect("queued");
        assert_eq!(sink.flush().await, 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (mut sink, _rx) = started(config(8, None)).await;
        assert!(sink.start(CancellationToken::new()).await.is_err());
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_later_timestamp_flushes_closed_bucket() {
        let (sink, mut rx) = started(config(64, Some(10))).await;

        sink.submit(MeasurementEvent::timer(0.0, "req", 2.0, 1))
            .expect("queued");
        sink.submit(MeasurementEvent::timer(5.0, "req", 4.0, 1))
            .expect("queued");
        sink.submit(MeasurementEvent::timer(10.5, "req", 1.0, 1))
            .expect("queued");

        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("report in time")
            .expect("channel open");
        assert_eq!(report.start_time, 0.0);
        assert_eq!(report.end_time, Some(10.0));
        assert_eq!(report.aggregates.len(), 1);
        assert_eq!(report.aggregates[0].event_count, 2);
        assert_eq!(report.aggregates[0].total_time, 6.0);
        assert_eq!(report.aggregates[0].average, Some(3.0));

        sink.stop().await;
        assert_eq!(sink.stats().flushed_buckets, 1);
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let (sink, mut rx) = started(config(64, None)).await;

        sink.submit(MeasurementEvent::timer(1.0, "a", 0.5, 1))
            .expect("queued");
        sink.submit(MeasurementEvent::counter(2.0, "b", 3))
            .expect("queued");

        assert_eq!(sink.flush().await, 2);
        assert_eq!(sink.flush().await, 0);

        let report = rx.recv().await.expect("one report");
        assert!(report.is_unbounded());
        assert_eq!(report.aggregates[0].tag, "a");
        assert_eq!(report.aggregates[1].kind, EventKind::Counter);
        assert!(rx.try_recv().is_err());

        sink.stop().await;
    }

    #[tokio::test]
    async fn test_flush_keeps_window_open() {
        let (sink, mut rx) = started(config(64, Some(10))).await;

        sink.submit(MeasurementEvent::counter(100.0, "a", 1))
            .expect("queued");
        assert_eq!(sink.flush().await, 1);

        // Still inside [100, 110]: lands in the same window, not a new one.
        sink.submit(MeasurementEvent::counter(104.0, "a", 2))
            .expect("queued");
        assert_eq!(sink.flush().await, 1);

        let first = rx.recv().await.expect("first");
        let second = rx.recv().await.expect("second");
        assert_eq!(first.start_time, 100.0);
        assert_eq!(second.start_time, 100.0);
        assert_eq!(second.aggregates[0].event_count, 2);

        sink.stop().await;
    }

    #[tokio::test]
    async fn test_late_events_are_counted_not_merged() {
        let (sink, mut rx) = started(config(64, Some(10))).await;

        sink.submit(MeasurementEvent::counter(100.0, "a", 1))
            .expect("queued");
        sink.submit(MeasurementEvent::counter(50.0, "a", 1))
            .expect("queued");
        assert_eq!(sink.flush().await, 1);

        let report = rx.recv().await.expect("report");
        assert_eq!(report.aggregates[0].event_count, 1);
        assert_eq!(sink.stats().late, 1);

        sink.stop().await;
    }

    #[tokio::test]
    async fn test_non_finite_timestamp_is_counted_invalid() {
        let (sink, mut rx) = started(config(64, Some(10))).await;

        sink.submit(MeasurementEvent::counter(f64::NAN, "a", 1))
            .expect("queued");
        sink.submit(MeasurementEvent::counter(1.0, "a", 1))
            .expect("queued");
        assert_eq!(sink.flush().await, 1);

        let stats = sink.stats();
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.late, 0);
        let report = rx.recv().await.expect("report");
        assert_eq!(report.start_time, 1.0);
        assert_eq!(report.event_count(), 1);

        sink.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_blocking_waits_for_room() {
        let (sink, mut rx) = started(config(4, None)).await;
        let sink = Arc::new(sink);

        let producer = Arc::clone(&sink);
        let sent = tokio::task::spawn_blocking(move || {
            (0..1_000)
                .filter(|i| {
                    producer
                        .submit_blocking(MeasurementEvent::counter(*i as f64, "replay", 1))
                        .is_ok()
                })
                .count()
        })
        .await
        .expect("producer");
        assert_eq!(sent, 1_000);

        assert_eq!(sink.flush().await, 1);
        sink.stop().await;

        let stats = sink.stats();
        assert_eq!(stats.submitted, 1_000);
        assert_eq!(stats.dropped, 0);
        let report = rx.recv().await.expect("report");
        assert_eq!(report.event_count(), 1_000);
    }

    #[tokio::test]
    async fn test_submit_blocking_after_stop_is_closed() {
        let (sink, _rx) = started(config(8, None)).await;
        sink.stop().await;

        let sink = Arc::new(sink);
        let producer = Arc::clone(&sink);
        let result = tokio::task::spawn_blocking(move || {
            producer.submit_blocking(MeasurementEvent::counter(0.0, "a", 1))
        })
        .await
        .expect("producer");
        assert_eq!(result, Err(SubmitError::Closed));
        assert_eq!(sink.stats().dropped, 1);
    }

    #[test]
    fn test_drain_stops_at_limit() {
        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..5 {
            tx.try_send(MeasurementEvent::counter(i as f64, "a", 1))
                .expect("queued");
        }

        let mut consumer = Consumer {
            index: BucketIndex::new(Interval::unbounded()),
            collector: Collector::default(),
            exporters: Vec::new(),
            stats: Arc::new(SharedStats::default()),
        };
        assert_eq!(consumer.drain(&mut rx, 2), 2);
        assert_eq!(rx.len(), 3);
        assert_eq!(consumer.drain(&mut rx, 10), 3);
        assert_eq!(
            consumer.index.current().map(|b| b.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_closed() {
        let (sink, _rx) = started(config(8, None)).await;
        sink.stop().await;

        assert_eq!(
            sink.submit(MeasurementEvent::counter(0.0, "a", 1)),
            Err(SubmitError::Closed)
        );
        assert_eq!(sink.flush().await, 0);
    }

    #[tokio::test]
    async fn test_cancelling_parent_token_stops_consumer() {
        let ctx = CancellationToken::new();
        let mut sink = AggregatedSink::new(config(8, None));
        sink.start(ctx.clone()).await.expect("start");

        ctx.cancel();
        sink.wait_for_shutdown().await;
        assert_eq!(
            sink.submit(MeasurementEvent::counter(0.0, "a", 1)),
            Err(SubmitError::Closed)
        );
    }
}
