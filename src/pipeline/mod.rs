//! Capture, convert and publish into shared memory

pub mod group;
pub mod publish;
pub mod shutdown;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::capture::{self, SourceError, ViewKind};
use crate::shm::BufferError;
use crate::Config;

pub use group::{ColorGroup, MeasurementGroup};
pub use publish::{PublishCounters, PublishPipeline, PublishStats, Step, DEFAULT_BACKOFF};
pub use shutdown::ShutdownToken;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("source returned no {0} view")]
    MissingView(ViewKind),
    #[error("{kind} view is {actual} bytes, expected {expected}")]
    ViewSize {
        kind: ViewKind,
        expected: usize,
        actual: usize,
    },
    #[error("shared memory '{name}' holds {capacity} bytes, {needed} needed")]
    Capacity {
        name: String,
        capacity: usize,
        needed: usize,
    },
}

/// Opens the camera, creates every segment and publishes until `shutdown`
/// is cancelled. Any error before the loop starts is fatal.
pub fn launch(config: Config, shutdown: ShutdownToken) -> Result<PublishStats, PublishError> {
    if let Some(id) = config.publish.pin_core {
        if core_affinity::set_for_current(core_affinity::CoreId { id }) {
            info!("Publish thread pinned to core {}", id);
        } else {
            warn!("Failed to pin publish thread to core {}", id);
        }
    }

    let profile = config.capture.profile;
    let source = capture::open_source(&config.capture, config.publish.measurements)?;
    info!("Camera: {}", source.describe());

    let (width, height) = config.capture.view.size(profile);
    let color = ColorGroup::create(&config.publish, width, height)?;
    let measurements = if config.publish.measurements {
        Some(MeasurementGroup::create(&config.publish, profile.width, profile.height)?)
    } else {
        None
    };

    #[cfg_attr(not(feature = "sdl-preview"), allow(unused_mut))]
    let mut pipeline = PublishPipeline::new(source, color, measurements)?
        .with_backoff(Duration::from_millis(config.publish.retry_backoff_ms));

    #[cfg(feature = "sdl-preview")]
    let _preview_thread = if config.preview.enabled {
        let (sink, handle) = crate::display::spawn_preview(width, height);
        pipeline = pipeline.with_preview(Box::new(sink));
        Some(handle)
    } else {
        None
    };
    #[cfg(not(feature = "sdl-preview"))]
    if config.preview.enabled {
        warn!("Preview requested but this build has no preview support");
    }

    let stats = pipeline.run(&shutdown)?;
    drop(pipeline.into_source());
    info!("Camera released");
    Ok(stats)
}
