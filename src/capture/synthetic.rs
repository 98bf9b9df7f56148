//! Hardware-free source rendering a moving test scene

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::capture::{ColorView, Frame, FrameSource, SourceError, SourceInfo, ViewKind};
use crate::profile::Profile;

/// Horizontal shift between the left and right images, in pixels
const DISPARITY: usize = 16;

/// Renders a scene looking at a tilted plane: near at the bottom of the
/// image, far at the top.
pub struct SyntheticSource {
    profile: Profile,
    view: ColorView,
    frame: Frame,
    measurements: bool,
    fail_every: Option<u32>,
    attempts: u64,
    interval: Duration,
    next_due: Instant,
    started: Instant,
}

impl SyntheticSource {
    pub fn new(profile: Profile, view: ColorView, measurements: bool, fail_every: Option<u32>) -> Self {
        let (width, height) = view.size(profile);
        info!("Synthetic source {} ({:?} view)", profile, view);
        let now = Instant::now();
        Self {
            profile,
            view,
            frame: Frame::new(width, height, measurements.then_some(profile.width)),
            measurements,
            fail_every: fail_every.filter(|&n| n > 0),
            attempts: 0,
            interval: Duration::from_secs(1) / profile.fps.max(1),
            next_due: now,
            started: now,
        }
    }

    /// Depth in metres of the plane at image row `y`
    fn depth_at(&self, y: usize) -> f32 {
        let h = self.profile.height.max(1) as f32;
        4.0 - 3.0 * (y as f32 / h)
    }

    fn render_color(&mut self) {
        let seq = self.frame.meta.sequence as usize;
        let width = self.frame.meta.width as usize;
        let half = self.profile.width as usize;
        let height = self.profile.height as usize;

        for y in 0..height {
            let grey = (255.0 * (1.0 - (self.depth_at(y) - 1.0) / 3.0)) as u8;
            let row = &mut self.frame.color[y * width * 4..(y + 1) * width * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                if self.view == ColorView::Depth {
                    px.copy_from_slice(&[grey, grey, grey, 0xff]);
                    continue;
                }
                // Right half of a side-by-side image sees the scene shifted
                let sx = if x >= half { x - half + DISPARITY } else { x };
                px[0] = (sx + seq * 4) as u8;
                px[1] = (y * 255 / height.max(1)) as u8;
                px[2] = ((sx / 32 + y / 32 + seq / 8) % 2 * 200 + 30) as u8;
                px[3] = 0xff;
            }
        }
    }

    fn render_measurements(&mut self) {
        let width = self.profile.width as usize;
        let height = self.profile.height as usize;
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let focal = width as f32;

        for y in 0..height {
            let z = self.depth_at(y);
            for x in 0..width {
                let i = y * width + x;
                let point = [(x as f32 - cx) * z / focal, (y as f32 - cy) * z / focal, z, 0.0f32];
                for (c, v) in point.iter().enumerate() {
                    self.frame.xyz[i * 16 + c * 4..i * 16 + c * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
                let confidence = 100.0 * x as f32 / width.max(1) as f32;
                self.frame.confidence[i * 4..i * 4 + 4].copy_from_slice(&confidence.to_le_bytes());
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> SourceInfo {
        let (width, height) = self.view.size(self.profile);
        SourceInfo {
            model: "synthetic".into(),
            serial: None,
            firmware: None,
            width,
            height,
            fps: self.profile.fps,
        }
    }

    fn supports(&self, kind: ViewKind) -> bool {
        kind == ViewKind::Color || self.measurements
    }

    fn acquire(&mut self) -> Result<(), SourceError> {
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + self.interval;

        self.attempts += 1;
        if let Some(n) = self.fail_every {
            if self.attempts % n as u64 == 0 {
                return Err(SourceError::Acquire("simulated dropout".into()));
            }
        }

        self.frame.meta.sequence += 1;
        self.frame.meta.device_timestamp = Some(self.started.elapsed());
        self.render_color();
        if self.measurements {
            self.render_measurements();
        }
        Ok(())
    }

    fn view(&self, kind: ViewKind) -> Option<&[u8]> {
        self.frame.view(kind)
    }
}
