//! Publish groups: buffers that describe the same instant and carry one
//! timestamp per iteration.
//!
//! Every group publishes the same way: lock all members in a fixed order,
//! stamp and write them, unlock them all, then notify them all. A reader
//! woken by any member therefore finds its siblings already carrying the
//! same timestamp.

use tracing::info;

use crate::capture::ViewKind;
use crate::convert::{
    confidence_len, packed_len, packed_to_planar_into, planar_to_packed_into, xyz_len, I420Layout,
};
use crate::pipeline::PublishError;
use crate::shm::{BufferError, SharedFrameBuffer, Timestamp};
use crate::{PublishConfig, SegmentKind};

fn check_view(kind: ViewKind, view: &[u8], expected: usize) -> Result<(), PublishError> {
    if view.len() != expected {
        return Err(PublishError::ViewSize {
            kind,
            expected,
            actual: view.len(),
        });
    }
    Ok(())
}

fn check_capacity(buffer: &SharedFrameBuffer, needed: usize) -> Result<(), PublishError> {
    if buffer.capacity() < needed {
        return Err(PublishError::Capacity {
            name: buffer.name().to_string(),
            capacity: buffer.capacity(),
            needed,
        });
    }
    Ok(())
}

fn create(config: &PublishConfig, kind: SegmentKind, capacity: usize) -> Result<SharedFrameBuffer, BufferError> {
    let name = config.segment_name(kind);
    let buffer = SharedFrameBuffer::create(&name, capacity)?;
    info!("Shared memory '{}' ({} bytes) ready", buffer.name(), buffer.capacity());
    Ok(buffer)
}

/// Planar and packed renditions of the color image.
///
/// The packed buffer is always re-derived from the planar bytes rather than
/// copied from the sensor, so both carry identical subsampling.
pub struct ColorGroup {
    layout: I420Layout,
    i420: SharedFrameBuffer,
    argb: SharedFrameBuffer,
    planar: Vec<u8>,
    packed: Vec<u8>,
}

impl ColorGroup {
    pub fn new(width: u32, height: u32, i420: SharedFrameBuffer, argb: SharedFrameBuffer) -> Result<Self, PublishError> {
        let layout = I420Layout::new(width, height);
        check_capacity(&i420, layout.len())?;
        check_capacity(&argb, packed_len(width, height))?;

        Ok(Self {
            planar: vec![0; layout.len()],
            packed: vec![0; packed_len(width, height)],
            layout,
            i420,
            argb,
        })
    }

    /// Creates the `i420` and `argb` segments for a `width x height` image.
    pub fn create(config: &PublishConfig, width: u32, height: u32) -> Result<Self, PublishError> {
        let i420 = create(config, SegmentKind::I420, I420Layout::new(width, height).len())?;
        let argb = create(config, SegmentKind::Argb, packed_len(width, height))?;
        Self::new(width, height, i420, argb)
    }

    /// The packed bytes published by the last [`ColorGroup::publish`]
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn publish(&mut self, color: &[u8], ts: Timestamp) -> Result<(), PublishError> {
        check_view(ViewKind::Color, color, self.packed.len())?;

        packed_to_planar_into(color, &self.layout, &mut self.planar);
        planar_to_packed_into(&self.planar, &self.layout, &mut self.packed);

        {
            let mut planar = self.i420.lock()?;
            let mut packed = self.argb.lock()?;
            planar.set_timestamp(ts);
            planar.write(0, &self.planar);
            packed.set_timestamp(ts);
            packed.write(0, &self.packed);
            drop(planar);
            drop(packed);
        }
        self.i420.notify_all()?;
        self.argb.notify_all()?;
        Ok(())
    }
}

/// Point cloud and depth confidence, locked in that order.
pub struct MeasurementGroup {
    xyz: SharedFrameBuffer,
    confidence: SharedFrameBuffer,
    xyz_len: usize,
    confidence_len: usize,
}

impl MeasurementGroup {
    pub fn new(width: u32, height: u32, xyz: SharedFrameBuffer, confidence: SharedFrameBuffer) -> Result<Self, PublishError> {
        let (xyz_len, confidence_len) = (xyz_len(width, height), confidence_len(width, height));
        check_capacity(&xyz, xyz_len)?;
        check_capacity(&confidence, confidence_len)?;

        Ok(Self {
            xyz,
            confidence,
            xyz_len,
            confidence_len,
        })
    }

    /// Creates the `xyz` and `dconf` segments for a `width x height` map.
    pub fn create(config: &PublishConfig, width: u32, height: u32) -> Result<Self, PublishError> {
        let xyz = create(config, SegmentKind::Xyz, xyz_len(width, height))?;
        let confidence = create(config, SegmentKind::Dconf, confidence_len(width, height))?;
        Self::new(width, height, xyz, confidence)
    }

    pub fn publish(&mut self, xyz: &[u8], confidence: &[u8], ts: Timestamp) -> Result<(), PublishError> {
        check_view(ViewKind::PointCloud, xyz, self.xyz_len)?;
        check_view(ViewKind::Confidence, confidence, self.confidence_len)?;

        {
            let mut points = self.xyz.lock()?;
            let mut conf = self.confidence.lock()?;
            points.set_timestamp(ts);
            points.write(0, xyz);
            conf.set_timestamp(ts);
            conf.write(0, confidence);
            drop(points);
            drop(conf);
        }
        self.xyz.notify_all()?;
        self.confidence.notify_all()?;
        Ok(())
    }
}
