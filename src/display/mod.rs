//! Optional local preview of the packed color buffer

#[cfg(feature = "sdl-preview")]
pub mod display;

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::shm::Timestamp;

#[cfg(feature = "sdl-preview")]
pub use display::{spawn_preview, Sdl2Preview};

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("preview window closed")]
    Closed,
}

/// Receives every packed frame right after it is published.
///
/// Implementations must return promptly; the publish loop calls this inline.
pub trait PreviewSink: Send {
    fn present(&mut self, packed: &[u8], ts: Timestamp) -> Result<(), PreviewError>;
}

/// Frame handed to the preview thread
#[derive(Clone)]
pub struct PreviewFrame {
    pub data: Bytes,
    pub timestamp: Timestamp,
}

/// Sink that forwards frames over a one-slot channel and drops them while
/// the previous one is still being drawn.
pub struct ChannelPreview {
    tx: Sender<PreviewFrame>,
}

pub fn preview_channel() -> (ChannelPreview, Receiver<PreviewFrame>) {
    let (tx, rx) = flume::bounded(1);
    (ChannelPreview { tx }, rx)
}

impl PreviewSink for ChannelPreview {
    fn present(&mut self, packed: &[u8], ts: Timestamp) -> Result<(), PreviewError> {
        let frame = PreviewFrame {
            data: Bytes::copy_from_slice(packed),
            timestamp: ts,
        };
        match self.tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(PreviewError::Closed),
        }
    }
}
