use std::path::Path;

use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::SourceError;

/// Finds the first capture device streaming YUYV, the format the stereo
/// camera exposes over UVC
pub fn find_capture_device() -> Result<String, SourceError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"YUYV")) {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(SourceError::NoDevice)
}
