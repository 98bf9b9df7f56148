//! The capture, convert, publish loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, info, instrument, warn};

use crate::capture::{FrameSource, SourceError, ViewKind};
use crate::display::PreviewSink;
use crate::pipeline::group::{ColorGroup, MeasurementGroup};
use crate::pipeline::{PublishError, ShutdownToken};
use crate::shm::MonotonicClock;

/// Default pause after a failed acquisition
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Published,
    /// Acquisition failed; nothing was written
    Retried,
}

/// Loop counters, readable from other threads while the loop runs
#[derive(Debug, Default)]
pub struct PublishCounters {
    iterations: CachePadded<AtomicU64>,
    published: CachePadded<AtomicU64>,
    acquire_failures: CachePadded<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub iterations: u64,
    pub published: u64,
    pub acquire_failures: u64,
}

impl PublishCounters {
    pub fn snapshot(&self) -> PublishStats {
        PublishStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
        }
    }
}

/// Single-threaded producer for the color group and, optionally, the
/// measurement group.
pub struct PublishPipeline<S> {
    source: S,
    color: ColorGroup,
    measurements: Option<MeasurementGroup>,
    preview: Option<Box<dyn PreviewSink>>,
    clock: MonotonicClock,
    backoff: Duration,
    failing: bool,
    counters: Arc<PublishCounters>,
}

impl<S: FrameSource> PublishPipeline<S> {
    pub fn new(source: S, color: ColorGroup, measurements: Option<MeasurementGroup>) -> Result<Self, PublishError> {
        let mut needed = vec![ViewKind::Color];
        if measurements.is_some() {
            needed.extend([ViewKind::PointCloud, ViewKind::Confidence]);
        }
        if let Some(&kind) = needed.iter().find(|&&kind| !source.supports(kind)) {
            return Err(SourceError::Unsupported(format!("the {kind} view")).into());
        }

        Ok(Self {
            source,
            color,
            measurements,
            preview: None,
            clock: MonotonicClock::new(),
            backoff: DEFAULT_BACKOFF,
            failing: false,
            counters: Arc::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Hands every published packed frame to `sink`. The sink must not block;
    /// if it fails it is dropped and publishing carries on.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    pub fn counters(&self) -> Arc<PublishCounters> {
        self.counters.clone()
    }

    /// Runs iterations until `shutdown` is cancelled. The token is checked
    /// between iterations only, so a started publish always completes.
    pub fn run(&mut self, shutdown: &ShutdownToken) -> Result<PublishStats, PublishError> {
        info!("Publishing");
        while !shutdown.is_cancelled() {
            self.step()?;
        }

        let stats = self.counters.snapshot();
        info!(
            "Shutdown requested after {} iterations ({} published, {} acquire failures)",
            stats.iterations, stats.published, stats.acquire_failures
        );
        Ok(stats)
    }

    /// One iteration: acquire, then publish each enabled group.
    #[instrument(skip(self), level = "trace")]
    pub fn step(&mut self) -> Result<Step, PublishError> {
        self.counters.iterations.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.source.acquire() {
            self.counters.acquire_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("zedshm_acquire_failures").increment(1);
            if !self.failing {
                warn!("Acquire failed, retrying every {:?}: {}", self.backoff, e);
                self.failing = true;
            } else {
                debug!("Acquire failed: {}", e);
            }
            thread::sleep(self.backoff);
            return Ok(Step::Retried);
        }
        if self.failing {
            info!("Acquire recovered");
            self.failing = false;
        }

        let started = Instant::now();

        let color = self
            .source
            .view(ViewKind::Color)
            .ok_or(PublishError::MissingView(ViewKind::Color))?;
        let ts = self.clock.now();
        self.color.publish(color, ts)?;

        if let Some(sink) = self.preview.as_mut() {
            if let Err(e) = sink.present(self.color.packed(), ts) {
                warn!("Preview stopped: {}", e);
                self.preview = None;
            }
        }

        if let Some(group) = self.measurements.as_mut() {
            let xyz = self
                .source
                .view(ViewKind::PointCloud)
                .ok_or(PublishError::MissingView(ViewKind::PointCloud))?;
            let confidence = self
                .source
                .view(ViewKind::Confidence)
                .ok_or(PublishError::MissingView(ViewKind::Confidence))?;
            let ts = self.clock.now();
            group.publish(xyz, confidence, ts)?;
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("zedshm_frames_published").increment(1);
        metrics::histogram!("zedshm_publish_time_us").record(started.elapsed().as_micros() as f64);
        Ok(Step::Published)
    }

    /// Stops publishing and hands the source back, e.g. to close it.
    pub fn into_source(self) -> S {
        self.source
    }
}
