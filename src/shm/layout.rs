//! Binary layout of a frame buffer segment.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SegmentHeader                          │
//! │  magic │ version │ data_offset │ capacity │ timestamp_us     │
//! │  pthread_mutex_t (process shared, robust)                    │
//! │  pthread_cond_t  (process shared, CLOCK_MONOTONIC)           │
//! ├──────────────────────────── padding to 64 bytes ─────────────┤
//! │                  frame bytes [0, capacity)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every field after `capacity` is only touched while `mutex` is held.

use std::mem::size_of;

/// ASCII "ZEDSHMFB"
pub const SEGMENT_MAGIC: u64 = 0x5A45_4453_484D_4642;

/// Bump on any incompatible change to [`SegmentHeader`].
pub const SEGMENT_VERSION: u64 = 1;

/// Alignment of the frame bytes inside the segment.
pub const DATA_ALIGN: usize = 64;

#[repr(C)]
pub struct SegmentHeader {
    pub magic: u64,
    pub version: u64,
    pub data_offset: u64,
    pub capacity: u64,
    pub timestamp_us: i64,
    pub mutex: libc::pthread_mutex_t,
    pub cond: libc::pthread_cond_t,
}

impl SegmentHeader {
    /// Checks a mapped header written by another process. `mapped` is the
    /// size of the whole mapping.
    pub fn validate(&self, mapped: usize) -> Result<(), &'static str> {
        if self.magic != SEGMENT_MAGIC {
            return Err("bad magic");
        }
        if self.version != SEGMENT_VERSION {
            return Err("wrong version");
        }
        if self.data_offset as usize != data_offset() {
            return Err("unexpected data offset");
        }
        if self.capacity == 0 || bytes_for_segment(self.capacity as usize) > mapped {
            return Err("capacity exceeds mapping");
        }
        Ok(())
    }
}

/// Offset of the first frame byte.
pub const fn data_offset() -> usize {
    size_of::<SegmentHeader>().next_multiple_of(DATA_ALIGN)
}

/// Total segment size for `capacity` frame bytes.
pub const fn bytes_for_segment(capacity: usize) -> usize {
    data_offset() + capacity
}
