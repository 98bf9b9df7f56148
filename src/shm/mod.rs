//! Shared frame buffers: named POSIX shared memory segments readable by any
//! process on the host

pub mod buffer;
pub mod layout;
pub mod timestamp;

pub use buffer::{BufferError, FrameGuard, SharedFrameBuffer};
pub use timestamp::{MonotonicClock, Timestamp};
