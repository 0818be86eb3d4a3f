//! Timers and counters that feed measurements into a [`Sink`].

use std::sync::Arc;

use thiserror::Error;

use crate::clock::Clock;
use crate::event::MeasurementEvent;
use crate::sink::Sink;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ProbeError {
    #[error("sample_rate must be in (0, 1], got {0}")]
    InvalidSampleRate(f64),

    #[error("threshold must be a finite, non-negative number of seconds, got {0}")]
    InvalidThreshold(f64),
}

/// Emission policy shared by timers and counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerOptions {
    /// Timer measurements shorter than this many seconds are not emitted.
    pub threshold: f64,
    /// Fraction of measurements emitted. Emitted counts are scaled back up.
    pub sample_rate: f64,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            sample_rate: 1.0,
        }
    }
}

impl TimerOptions {
    pub fn validate(&self) -> Result<(), ProbeError> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(ProbeError::InvalidSampleRate(self.sample_rate));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ProbeError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Random sampling with count scaling.
#[derive(Debug, Clone)]
struct Sampler {
    rate: f64,
    rng: fastrand::Rng,
}

impl Sampler {
    fn new(rate: f64) -> Self {
        Self {
            rate,
            rng: fastrand::Rng::new(),
        }
    }

    /// `Some(scaled_count)` if this measurement should be emitted.
    fn sample(&mut self, count: u64) -> Option<u64> {
        if self.rate >= 1.0 {
            return Some(count);
        }
        if self.rng.f64() >= self.rate {
            return None;
        }
        let scaled = (count as f64 / self.rate).round();
        Some(scaled.max(1.0) as u64)
    }
}

/// Measures elapsed time between `start` and `stop`.
///
/// The timer starts on construction. Each `stop` emits a timer event stamped
/// with the start time.
pub struct Timer {
    sink: Arc<dyn Sink>,
    clock: Arc<dyn Clock>,
    start_time: f64,
    threshold: f64,
    sampler: Sampler,
}

impl Timer {
    pub fn new(sink: Arc<dyn Sink>, clock: Arc<dyn Clock>) -> Self {
        let start_time = clock.now();
        Self {
            sink,
            clock,
            start_time,
            threshold: 0.0,
            sampler: Sampler::new(1.0),
        }
    }

    pub fn with_options(
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
        options: TimerOptions,
    ) -> Result<Self, ProbeError> {
        options.validate()?;
        let mut timer = Self::new(sink, clock);
        timer.threshold = options.threshold;
        timer.sampler = Sampler::new(options.sample_rate);
        Ok(timer)
    }

    /// Reseeds the sampling RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.sampler.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Restarts the measurement from now.
    pub fn start(&mut self) {
        self.start_time = self.clock.now();
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Emits the time since the last start under `tag` and returns it.
    ///
    /// The elapsed time is returned even when threshold or sampling suppress
    /// the event.
    pub fn stop(&mut self, tag: &str) -> f64 {
        let elapsed = self.clock.now() - self.start_time;
        if elapsed >= self.threshold {
            if let Some(count) = self.sampler.sample(1) {
                self.sink
                    .log(MeasurementEvent::timer(self.start_time, tag, elapsed, count));
            }
        }
        elapsed
    }

    /// `stop` followed by `start`.
    pub fn lap(&mut self, tag: &str) -> f64 {
        let elapsed = self.stop(tag);
        self.start();
        elapsed
    }
}

/// Counts occurrences.
pub struct Counter {
    sink: Arc<dyn Sink>,
    clock: Arc<dyn Clock>,
    sampler: Sampler,
}

impl Counter {
    pub fn new(sink: Arc<dyn Sink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            sampler: Sampler::new(1.0),
        }
    }

    pub fn with_sample_rate(
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
        sample_rate: f64,
    ) -> Result<Self, ProbeError> {
        TimerOptions {
            sample_rate,
            ..TimerOptions::default()
        }
        .validate()?;
        let mut counter = Self::new(sink, clock);
        counter.sampler = Sampler::new(sample_rate);
        Ok(counter)
    }

    /// Reseeds the sampling RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.sampler.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn incr(&mut self, tag: &str) {
        self.incr_by(tag, 1);
    }

    /// Emits a counter event for `n` occurrences. `n == 0` is ignored.
    pub fn incr_by(&mut self, tag: &str, n: u64) {
        if n == 0 {
            return;
        }
        if let Some(count) = self.sampler.sample(n) {
            self.sink
                .log(MeasurementEvent::counter(self.clock.now(), tag, count));
        }
    }
}
