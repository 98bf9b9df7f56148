use std::time::Duration;

use crate::capture::ViewKind;
use crate::convert::{confidence_len, packed_len, xyz_len};

/// The most recently acquired frame, owned by a source and overwritten on
/// every acquisition
pub struct Frame {
    pub color: Vec<u8>,
    pub xyz: Vec<u8>,
    pub confidence: Vec<u8>,
    pub meta: FrameMetadata,
}

/// Frame metadata
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    /// Allocates a frame with a `color_width x height` color view and, when
    /// `measure_width` is given, `measure_width x height` measurement views.
    pub fn new(color_width: u32, height: u32, measure_width: Option<u32>) -> Self {
        let (xyz, confidence) = match measure_width {
            Some(w) => (vec![0; xyz_len(w, height)], vec![0; confidence_len(w, height)]),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            color: vec![0; packed_len(color_width, height)],
            xyz,
            confidence,
            meta: FrameMetadata {
                width: color_width,
                height,
                ..Default::default()
            },
        }
    }

    pub fn view(&self, kind: ViewKind) -> Option<&[u8]> {
        let bytes = match kind {
            ViewKind::Color => &self.color,
            ViewKind::PointCloud => &self.xyz,
            ViewKind::Confidence => &self.confidence,
        };
        (!bytes.is_empty()).then_some(bytes.as_slice())
    }
}
