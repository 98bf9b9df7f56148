pub mod capture;
pub mod cli;
pub mod convert;
pub mod display;
pub mod pipeline;
pub mod profile;
pub mod shm;
pub mod utils;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use capture::{CaptureBackend, ColorView};
use profile::{Profile, ProfileError};

/// Base segment name when none is configured
pub const DEFAULT_NAME: &str = "video0";

/// Prefix of environment overrides, e.g. `ZEDSHM_CAPTURE__PROFILE=672x376@100`
pub const ENV_PREFIX: &str = "ZEDSHM";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub publish: PublishConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    pub profile: Profile,
    /// `/dev/video<N>`; auto-detected when unset
    pub camera: Option<u32>,
    /// Compute device for depth processing, -1 lets the driver choose
    pub gpu: i32,
    pub view: ColorView,
    /// Synthetic backend only: fail every n-th acquisition
    pub synthetic_fail_every: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Base of every segment name, `<name>.<suffix>`
    pub name: String,
    /// Per-segment names replacing `<name>.<suffix>`
    pub names: SegmentNames,
    /// Publish the point cloud and confidence group
    pub measurements: bool,
    pub retry_backoff_ms: u64,
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentNames {
    pub i420: Option<String>,
    pub argb: Option<String>,
    pub xyz: Option<String>,
    pub dconf: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
}

/// The four published segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    I420,
    Argb,
    Xyz,
    Dconf,
}

impl SegmentKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            SegmentKind::I420 => "i420",
            SegmentKind::Argb => "argb",
            SegmentKind::Xyz => "xyz",
            SegmentKind::Dconf => "dconf",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::V4l2,
            profile: Profile::default(),
            camera: Some(0),
            gpu: -1,
            view: ColorView::Left,
            synthetic_fail_every: None,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            names: SegmentNames::default(),
            measurements: false,
            retry_backoff_ms: pipeline::DEFAULT_BACKOFF.as_millis() as u64,
            pin_core: None,
        }
    }
}

impl PublishConfig {
    pub fn segment_name(&self, kind: SegmentKind) -> String {
        let explicit = match kind {
            SegmentKind::I420 => &self.names.i420,
            SegmentKind::Argb => &self.names.argb,
            SegmentKind::Xyz => &self.names.xyz,
            SegmentKind::Dconf => &self.names.dconf,
        };
        match explicit {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let base = if self.name.is_empty() { DEFAULT_NAME } else { &self.name };
                format!("{}.{}", base, kind.suffix())
            }
        }
    }
}

impl Config {
    /// Layers built-in defaults, the optional TOML file at `path` and
    /// `ZEDSHM_*` environment variables. The profile is validated here,
    /// before anything is allocated.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
