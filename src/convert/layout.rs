//! Byte layouts of the published image formats

use std::ops::Range;

/// Planar 4:2:0 layout: a full resolution luma plane followed by the U and V
/// planes at half resolution in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Layout {
    pub width: usize,
    pub height: usize,
    pub chroma_width: usize,
    pub chroma_height: usize,
    pub y: Range<usize>,
    pub u: Range<usize>,
    pub v: Range<usize>,
}

impl I420Layout {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width as usize;
        let height = height as usize;
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);

        let luma = width * height;
        let chroma = chroma_width * chroma_height;

        Self {
            width,
            height,
            chroma_width,
            chroma_height,
            y: 0..luma,
            u: luma..luma + chroma,
            v: luma + chroma..luma + 2 * chroma,
        }
    }

    /// Total bytes, `width * height * 3 / 2` for even dimensions
    pub fn len(&self) -> usize {
        self.v.end
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn planes<'a>(&self, buf: &'a [u8]) -> (&'a [u8], &'a [u8], &'a [u8]) {
        assert_eq!(buf.len(), self.len(), "planar buffer size mismatch");
        (&buf[self.y.clone()], &buf[self.u.clone()], &buf[self.v.clone()])
    }

    pub fn planes_mut<'a>(&self, buf: &'a mut [u8]) -> (&'a mut [u8], &'a mut [u8], &'a mut [u8]) {
        assert_eq!(buf.len(), self.len(), "planar buffer size mismatch");
        let (y, chroma) = buf.split_at_mut(self.u.start);
        let (u, v) = chroma.split_at_mut(self.u.len());
        (y, u, v)
    }
}

/// Bytes per pixel of the packed four channel format
pub const PACKED_BPP: usize = 4;

/// Bytes per pixel of the point cloud: X, Y, Z and one unused `f32`
pub const XYZ_BPP: usize = 16;

/// Bytes per pixel of the depth confidence map: one `f32`
pub const CONFIDENCE_BPP: usize = 4;

pub fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * PACKED_BPP
}

pub fn xyz_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * XYZ_BPP
}

pub fn confidence_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CONFIDENCE_BPP
}
