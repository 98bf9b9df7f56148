//! Frame sources: where the pipeline gets its imagery and measurements

pub mod frame;
pub mod synthetic;
pub mod v4l2;

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::Profile;
use crate::CaptureConfig;

pub use frame::{Frame, FrameMetadata};
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// Named views a source exposes after each acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Packed BGRA image
    Color,
    /// Four `f32` per pixel: X, Y, Z and one unused channel
    PointCloud,
    /// One `f32` per pixel
    Confidence,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewKind::Color => "color",
            ViewKind::PointCloud => "point cloud",
            ViewKind::Confidence => "depth confidence",
        })
    }
}

/// Which picture the color view carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ColorView {
    /// Left camera image
    #[default]
    Left,
    /// Left and right images next to each other, twice the profile width
    SideBySide,
    /// Depth rendered as a grey image
    Depth,
}

impl ColorView {
    /// Size of the color image for `profile`
    pub fn size(&self, profile: Profile) -> (u32, u32) {
        match self {
            ColorView::SideBySide => (2 * profile.width, profile.height),
            ColorView::Left | ColorView::Depth => (profile.width, profile.height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    #[default]
    V4l2,
    Synthetic,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open camera {device}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("no suitable capture device found")]
    NoDevice,
    #[error("camera cannot provide {0}")]
    Unsupported(String),
    #[error("frame acquisition failed: {0}")]
    Acquire(String),
}

/// What the source reports about itself at startup
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub model: String,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model)?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {serial}")?;
        }
        if let Some(firmware) = &self.firmware {
            write!(f, " firmware {firmware}")?;
        }
        write!(f, ", {}x{} @ {} fps", self.width, self.height, self.fps)
    }
}

/// A camera, or anything pretending to be one.
///
/// Views returned by [`FrameSource::view`] are valid until the next
/// [`FrameSource::acquire`].
pub trait FrameSource {
    fn describe(&self) -> SourceInfo;

    fn supports(&self, kind: ViewKind) -> bool;

    /// Grabs the next frame, blocking briefly. Failures are transient and the
    /// caller may simply try again.
    fn acquire(&mut self) -> Result<(), SourceError>;

    fn view(&self, kind: ViewKind) -> Option<&[u8]>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> SourceInfo {
        (**self).describe()
    }

    fn supports(&self, kind: ViewKind) -> bool {
        (**self).supports(kind)
    }

    fn acquire(&mut self) -> Result<(), SourceError> {
        (**self).acquire()
    }

    fn view(&self, kind: ViewKind) -> Option<&[u8]> {
        (**self).view(kind)
    }
}

/// Opens the configured backend. Asking a backend for views it cannot
/// produce fails before any device is touched.
pub fn open_source(
    config: &CaptureConfig,
    measurements: bool,
) -> Result<Box<dyn FrameSource + Send>, SourceError> {
    Ok(match config.backend {
        CaptureBackend::V4l2 if measurements => {
            return Err(SourceError::Unsupported(format!(
                "the {} and {} views over V4L2",
                ViewKind::PointCloud,
                ViewKind::Confidence
            )));
        }
        CaptureBackend::V4l2 => Box::new(V4l2Source::new(config)?),
        CaptureBackend::Synthetic => Box::new(SyntheticSource::new(
            config.profile,
            config.view,
            measurements,
            config.synthetic_fail_every,
        )),
    })
}
