//! Publish loop behaviour against real shared memory segments.
//!
//! Each test creates its own uniquely named segments and reads them back
//! through independent reader handles, the way a consumer process would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use zedshm::capture::{FrameSource, SourceError, SourceInfo, ViewKind};
use zedshm::convert::{packed_len, planar_to_packed, xyz_len, I420Layout};
use zedshm::display::{PreviewError, PreviewSink};
use zedshm::pipeline::{ColorGroup, MeasurementGroup, PublishError, PublishPipeline, ShutdownToken, Step};
use zedshm::shm::{SharedFrameBuffer, Timestamp};
use zedshm::{PublishConfig, SegmentKind};

const W: u32 = 8;
const H: u32 = 6;

fn unique_config() -> PublishConfig {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    PublishConfig {
        name: format!(
            "zedshm-it-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ),
        ..Default::default()
    }
}

/// Source replaying a fixed script of acquisition outcomes; successes render
/// a frame that differs per acquisition.
struct ScriptedSource {
    script: VecDeque<bool>,
    measurements: bool,
    color: Vec<u8>,
    xyz: Vec<u8>,
    confidence: Vec<u8>,
    acquired: u64,
    cancel_after: Option<(u64, ShutdownToken)>,
}

impl ScriptedSource {
    fn new(measurements: bool) -> Self {
        Self {
            script: VecDeque::new(),
            measurements,
            color: vec![0; packed_len(W, H)],
            xyz: vec![0; xyz_len(W, H)],
            confidence: vec![0; (W * H * 4) as usize],
            acquired: 0,
            cancel_after: None,
        }
    }

    fn script(mut self, outcomes: &[bool]) -> Self {
        self.script.extend(outcomes);
        self
    }

    fn cancel_after(mut self, acquisitions: u64, token: ShutdownToken) -> Self {
        self.cancel_after = Some((acquisitions, token));
        self
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> SourceInfo {
        SourceInfo {
            model: "scripted".into(),
            serial: None,
            firmware: None,
            width: W,
            height: H,
            fps: 30,
        }
    }

    fn supports(&self, kind: ViewKind) -> bool {
        kind == ViewKind::Color || self.measurements
    }

    fn acquire(&mut self) -> Result<(), SourceError> {
        self.acquired += 1;
        if let Some((n, token)) = &self.cancel_after {
            if self.acquired >= *n {
                token.cancel();
            }
        }
        if !self.script.pop_front().unwrap_or(true) {
            return Err(SourceError::Acquire("scripted failure".into()));
        }

        let seed = self.acquired as u8;
        for (i, px) in self.color.chunks_exact_mut(4).enumerate() {
            let block = (i % W as usize / 2 + i / W as usize / 2 * 4) as u8;
            px.copy_from_slice(&[
                60 + block.wrapping_mul(7) % 100,
                80 + seed.wrapping_mul(13) % 90,
                50 + block.wrapping_add(seed) % 120,
                0x80,
            ]);
        }
        self.xyz.fill(seed);
        self.confidence.fill(seed.wrapping_add(1));
        Ok(())
    }

    fn view(&self, kind: ViewKind) -> Option<&[u8]> {
        match kind {
            ViewKind::Color => Some(&self.color),
            ViewKind::PointCloud if self.measurements => Some(&self.xyz),
            ViewKind::Confidence if self.measurements => Some(&self.confidence),
            _ => None,
        }
    }
}

struct Readers {
    i420: SharedFrameBuffer,
    argb: SharedFrameBuffer,
    xyz: Option<SharedFrameBuffer>,
    dconf: Option<SharedFrameBuffer>,
}

impl Readers {
    fn open(config: &PublishConfig, measurements: bool) -> Self {
        let open = |kind| SharedFrameBuffer::open(&config.segment_name(kind)).unwrap();
        Self {
            i420: open(SegmentKind::I420),
            argb: open(SegmentKind::Argb),
            xyz: measurements.then(|| open(SegmentKind::Xyz)),
            dconf: measurements.then(|| open(SegmentKind::Dconf)),
        }
    }

    fn all(&mut self) -> Vec<&mut SharedFrameBuffer> {
        let mut all = vec![&mut self.i420, &mut self.argb];
        all.extend(self.xyz.as_mut());
        all.extend(self.dconf.as_mut());
        all
    }

    /// Timestamp and content of every segment
    fn snapshot(&mut self) -> Vec<(Timestamp, Vec<u8>)> {
        self.all()
            .into_iter()
            .map(|buffer| {
                let guard = buffer.lock().unwrap();
                (guard.timestamp(), guard.data().to_vec())
            })
            .collect()
    }
}

fn pipeline(
    source: ScriptedSource,
    config: &PublishConfig,
) -> PublishPipeline<ScriptedSource> {
    let measurements = source.supports(ViewKind::PointCloud);
    let color = ColorGroup::create(config, W, H).unwrap();
    let group = measurements.then(|| MeasurementGroup::create(config, W, H).unwrap());
    PublishPipeline::new(source, color, group)
        .unwrap()
        .with_backoff(Duration::from_millis(1))
}

#[test]
fn color_group_shares_one_timestamp() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let mut readers = Readers::open(&config, true);

    assert_eq!(pipeline.step().unwrap(), Step::Published);

    let snap = readers.snapshot();
    let (i420, argb, xyz, dconf) = (snap[0].0, snap[1].0, snap[2].0, snap[3].0);
    assert!(i420 > Timestamp::ZERO);
    assert_eq!(i420, argb);
    assert_eq!(xyz, dconf);
    assert!(xyz >= i420);
}

#[test]
fn packed_buffer_is_derived_from_planar_buffer() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(false), &config);
    let mut readers = Readers::open(&config, false);

    pipeline.step().unwrap();

    let snap = readers.snapshot();
    let (planar, packed) = (&snap[0].1, &snap[1].1);
    assert_eq!(planar.len(), I420Layout::new(W, H).len());
    assert_eq!(packed, &planar_to_packed(planar, W, H));
    // Never the sensor bytes: those carry a different alpha
    assert!(packed.chunks_exact(4).all(|px| px[3] == 0xff));
}

#[test]
fn measurements_are_copied_verbatim() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let mut readers = Readers::open(&config, true);

    pipeline.step().unwrap();
    pipeline.step().unwrap();

    let snap = readers.snapshot();
    assert!(snap[2].1.iter().all(|&b| b == 2));
    assert!(snap[3].1.iter().all(|&b| b == 3));
}

#[test]
fn timestamps_never_decrease() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let mut readers = Readers::open(&config, true);

    let mut previous = vec![Timestamp::ZERO; 4];
    for _ in 0..5 {
        pipeline.step().unwrap();
        let stamps: Vec<Timestamp> = readers.snapshot().into_iter().map(|(ts, _)| ts).collect();
        for (now, before) in stamps.iter().zip(&previous) {
            assert!(now >= before);
        }
        previous = stamps;
    }
}

#[test]
fn failed_acquire_leaves_every_buffer_untouched() {
    let config = unique_config();
    let source = ScriptedSource::new(true).script(&[true, false, false]);
    let mut pipeline = pipeline(source, &config);
    let mut readers = Readers::open(&config, true);

    assert_eq!(pipeline.step().unwrap(), Step::Published);
    let before = readers.snapshot();

    assert_eq!(pipeline.step().unwrap(), Step::Retried);
    assert_eq!(pipeline.step().unwrap(), Step::Retried);
    assert_eq!(readers.snapshot(), before);

    assert_eq!(pipeline.step().unwrap(), Step::Published);
    assert_ne!(readers.snapshot(), before);

    let stats = pipeline.counters().snapshot();
    assert_eq!((stats.iterations, stats.published, stats.acquire_failures), (4, 2, 2));
}

#[test]
fn shutdown_lets_the_current_iteration_finish() {
    let config = unique_config();
    let shutdown = ShutdownToken::new();
    let source = ScriptedSource::new(true).cancel_after(3, shutdown.clone());
    let mut pipeline = pipeline(source, &config);
    let mut readers = Readers::open(&config, true);

    let stats = pipeline.run(&shutdown).unwrap();
    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.published, 3);

    // The cancelling iteration still published its measurements
    let snap = readers.snapshot();
    assert!(snap[2].1.iter().all(|&b| b == 3));
    assert_eq!(pipeline.into_source().acquired, 3);
}

#[test]
fn cancelled_token_publishes_nothing() {
    let config = unique_config();
    let shutdown = ShutdownToken::new();
    shutdown.cancel();
    let mut pipeline = pipeline(ScriptedSource::new(false), &config);
    let mut readers = Readers::open(&config, false);

    let stats = pipeline.run(&shutdown).unwrap();
    assert_eq!(stats.iterations, 0);
    assert!(readers.snapshot().iter().all(|(ts, _)| *ts == Timestamp::ZERO));
}

#[test]
fn measurement_group_needs_measurement_views() {
    let config = unique_config();
    let color = ColorGroup::create(&config, W, H).unwrap();
    let group = MeasurementGroup::create(&config, W, H).unwrap();
    let result = PublishPipeline::new(ScriptedSource::new(false), color, Some(group));
    assert!(matches!(
        result.err(),
        Some(PublishError::Source(SourceError::Unsupported(_)))
    ));
}

#[test]
fn mismatched_view_is_an_error() {
    let config = unique_config();
    // Buffers sized for a wider image than the source delivers
    let color = ColorGroup::create(&config, W * 2, H).unwrap();
    let mut pipeline = PublishPipeline::new(ScriptedSource::new(false), color, None).unwrap();
    assert!(matches!(
        pipeline.step(),
        Err(PublishError::ViewSize { kind: ViewKind::Color, .. })
    ));
}

#[test]
fn every_buffer_is_unlocked_and_notified() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let readers = Readers::open(&config, true);

    let waiters: Vec<_> = [
        readers.i420,
        readers.argb,
        readers.xyz.unwrap(),
        readers.dconf.unwrap(),
    ]
    .into_iter()
    .map(|mut buffer| {
        thread::spawn(move || {
            let woken = buffer.wait_newer(Timestamp::ZERO, Duration::from_secs(5)).unwrap();
            let ts = woken.map(|guard| guard.timestamp());
            ts
        })
    })
    .collect();

    thread::sleep(Duration::from_millis(50));
    pipeline.step().unwrap();

    let stamps: Vec<Timestamp> = waiters
        .into_iter()
        .map(|w| w.join().unwrap().expect("woken with a fresh frame"))
        .collect();
    assert_eq!(stamps[0], stamps[1]);
    assert_eq!(stamps[2], stamps[3]);
}

#[test]
fn group_members_are_never_seen_out_of_step() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let readers = Readers::open(&config, true);
    let (mut xyz, mut dconf) = (readers.xyz.unwrap(), readers.dconf.unwrap());
    let stop = ShutdownToken::new();

    // Holding both locks, taken in the producer's order, must always show
    // one instant across the group
    let checker = {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut checks = 0u64;
            loop {
                let points = xyz.lock().unwrap();
                let conf = dconf.lock().unwrap();
                assert_eq!(points.timestamp(), conf.timestamp());
                if points.timestamp() > Timestamp::ZERO {
                    assert_eq!(points.data()[0].wrapping_add(1), conf.data()[0]);
                }
                drop(conf);
                drop(points);
                checks += 1;
                if stop.is_cancelled() {
                    break checks;
                }
            }
        })
    };

    for _ in 0..100 {
        pipeline.step().unwrap();
    }
    stop.cancel();
    assert!(checker.join().unwrap() > 0);
}

#[test]
fn fixed_lock_order_survives_concurrent_readers() {
    let config = unique_config();
    let mut pipeline = pipeline(ScriptedSource::new(true), &config);
    let stop = ShutdownToken::new();

    // Each reader only ever holds one of the two measurement locks
    let spawn_reader = |kind| {
        let mut buffer = SharedFrameBuffer::open(&config.segment_name(kind)).unwrap();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut reads = 0u64;
            loop {
                let guard = buffer.lock().unwrap();
                let _ = guard.data()[0];
                drop(guard);
                reads += 1;
                if stop.is_cancelled() {
                    break reads;
                }
            }
        })
    };
    let readers = [spawn_reader(SegmentKind::Xyz), spawn_reader(SegmentKind::Dconf)];

    for _ in 0..200 {
        assert_eq!(pipeline.step().unwrap(), Step::Published);
    }
    stop.cancel();
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}

struct RecordingSink {
    frames: Arc<Mutex<Vec<(Timestamp, Vec<u8>)>>>,
}

impl PreviewSink for RecordingSink {
    fn present(&mut self, packed: &[u8], ts: Timestamp) -> Result<(), PreviewError> {
        self.frames.lock().unwrap().push((ts, packed.to_vec()));
        Ok(())
    }
}

struct ClosedSink {
    calls: Arc<AtomicUsize>,
}

impl PreviewSink for ClosedSink {
    fn present(&mut self, _: &[u8], _: Timestamp) -> Result<(), PreviewError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(PreviewError::Closed)
    }
}

#[test]
fn preview_sees_the_published_packed_frame() {
    let config = unique_config();
    let frames = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = pipeline(ScriptedSource::new(false), &config).with_preview(Box::new(RecordingSink {
        frames: frames.clone(),
    }));
    let mut readers = Readers::open(&config, false);

    pipeline.step().unwrap();

    let snap = readers.snapshot();
    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, snap[1].0);
    assert_eq!(frames[0].1, snap[1].1);
}

#[test]
fn failing_preview_does_not_stop_publishing() {
    let config = unique_config();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut pipeline = pipeline(ScriptedSource::new(false), &config).with_preview(Box::new(ClosedSink {
        calls: calls.clone(),
    }));

    for _ in 0..3 {
        assert_eq!(pipeline.step().unwrap(), Step::Published);
    }
    assert_eq!(calls.load(Ordering::Relaxed), 1);
}
