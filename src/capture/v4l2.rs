//! Stereo camera over V4L2 (UVC), streaming side-by-side YUYV frames

use std::time::Duration;

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{ColorView, Frame, FrameSource, SourceError, SourceInfo, ViewKind};
use crate::convert::yuyv_to_packed_into;
use crate::utils;
use crate::CaptureConfig;

/// Driver-side buffers for memory-mapped streaming
const BUFFER_COUNT: u32 = 4;

/// Camera as a plain UVC device. It only delivers the color image; depth
/// derived views need the vendor SDK.
pub struct V4l2Source {
    _device: Box<Device>,
    stream: MmapStream<'static>,
    frame: Frame,
    /// Width of the side-by-side sensor image
    sensor_width: usize,
    info: SourceInfo,
}

impl V4l2Source {
    pub fn new(config: &CaptureConfig) -> Result<Self, SourceError> {
        if config.view == ColorView::Depth {
            return Err(SourceError::Unsupported("a depth view over V4L2".into()));
        }

        let path = match config.camera {
            Some(index) => format!("/dev/video{index}"),
            None => utils::find_capture_device()?,
        };
        let open_err = |source| SourceError::Open {
            device: path.clone(),
            source,
        };
        info!("Initializing V4L2 capture: {}", path);
        debug!("Compute device {} is unused by the V4L2 backend", config.gpu);

        let device = Device::with_path(&path).map_err(open_err)?;
        let caps = device.query_caps().map_err(open_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SourceError::Unsupported(format!("video capture on {path}")));
        }

        let profile = config.profile;
        let sensor_width = 2 * profile.width;

        let mut fmt = device.format().map_err(open_err)?;
        fmt.width = sensor_width;
        fmt.height = profile.height;
        fmt.fourcc = FourCC::new(b"YUYV");
        let actual = device.set_format(&fmt).map_err(open_err)?;
        if actual.width != sensor_width || actual.height != profile.height || actual.fourcc != fmt.fourcc {
            return Err(SourceError::Unsupported(format!(
                "{}x{} YUYV (driver offered {}x{} {})",
                sensor_width, profile.height, actual.width, actual.height, actual.fourcc
            )));
        }

        let params = device
            .set_params(&Parameters::with_fps(profile.fps))
            .map_err(open_err)?;
        debug!("Stream parameters: {:?}", params);

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT).map_err(open_err)?;
        info!("Capture stream started with {} buffers", BUFFER_COUNT);

        let (width, height) = config.view.size(profile);
        Ok(Self {
            _device: Box::new(device),
            stream,
            frame: Frame::new(width, height, None),
            sensor_width: sensor_width as usize,
            info: SourceInfo {
                model: caps.card,
                serial: Some(caps.bus),
                firmware: Some(format!(
                    "{}.{}.{}",
                    caps.version.0, caps.version.1, caps.version.2
                )),
                width,
                height,
                fps: profile.fps,
            },
        })
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> SourceInfo {
        self.info.clone()
    }

    fn supports(&self, kind: ViewKind) -> bool {
        kind == ViewKind::Color
    }

    #[instrument(skip(self), level = "trace")]
    fn acquire(&mut self) -> Result<(), SourceError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| SourceError::Acquire(e.to_string()))?;

        let height = self.frame.meta.height as usize;
        if buf.len() < self.sensor_width * height * 2 {
            return Err(SourceError::Acquire(format!("short frame of {} bytes", buf.len())));
        }

        let width = self.frame.meta.width as usize;
        yuyv_to_packed_into(buf, self.sensor_width, width, height, &mut self.frame.color);

        self.frame.meta.sequence = meta.sequence as u64;
        self.frame.meta.device_timestamp = Some(
            Duration::from_secs(meta.timestamp.sec as u64)
                + Duration::from_micros(meta.timestamp.usec as u64),
        );
        Ok(())
    }

    fn view(&self, kind: ViewKind) -> Option<&[u8]> {
        self.frame.view(kind)
    }
}
