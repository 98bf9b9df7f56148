use std::path::PathBuf;

use clap::Parser;

use crate::capture::{CaptureBackend, ColorView};
use crate::profile::Profile;
use crate::{Config, SettingsError};

/// Publishes stereo camera frames into shared memory: I420 and ARGB color
/// images, plus point cloud and depth confidence maps.
#[derive(Debug, Default, Parser)]
#[command(name = "zedshm", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Resolution and frame rate, e.g. 1280x720@30
    #[arg(long)]
    pub profile: Option<String>,

    /// Base name of the shared memory segments (<name>.i420, <name>.argb, ...)
    #[arg(long)]
    pub name: Option<String>,

    /// Name of the I420 segment, overriding <name>.i420
    #[arg(long = "name-i420", alias = "name.i420")]
    pub name_i420: Option<String>,

    /// Name of the ARGB segment, overriding <name>.argb
    #[arg(long = "name-argb", alias = "name.argb")]
    pub name_argb: Option<String>,

    /// Name of the point cloud segment, overriding <name>.xyz
    #[arg(long = "name-xyz", alias = "name.xyz")]
    pub name_xyz: Option<String>,

    /// Name of the depth confidence segment, overriding <name>.dconf
    #[arg(long = "name-dconf", alias = "name.dconf")]
    pub name_dconf: Option<String>,

    /// Camera index, /dev/video<N>
    #[arg(long)]
    pub camera: Option<u32>,

    /// Compute device index for depth processing
    #[arg(long)]
    pub gpu: Option<i32>,

    /// Which picture to publish as the color image
    #[arg(long, value_enum, alias = "mode")]
    pub view: Option<ColorView>,

    /// Also publish point cloud (<name>.xyz) and depth confidence (<name>.dconf)
    #[arg(long)]
    pub measurements: bool,

    /// Use a generated test scene instead of a camera
    #[arg(long)]
    pub synthetic: bool,

    /// Debug logging and a preview window
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Loads the configuration and applies the command line on top of it.
    pub fn resolve(&self) -> Result<Config, SettingsError> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config)?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) -> Result<(), SettingsError> {
        if let Some(profile) = &self.profile {
            config.capture.profile = profile.parse::<Profile>()?;
        }
        if let Some(name) = &self.name {
            config.publish.name = name.clone();
        }
        if let Some(name) = &self.name_i420 {
            config.publish.names.i420 = Some(name.clone());
        }
        if let Some(name) = &self.name_argb {
            config.publish.names.argb = Some(name.clone());
        }
        if let Some(name) = &self.name_xyz {
            config.publish.names.xyz = Some(name.clone());
        }
        if let Some(name) = &self.name_dconf {
            config.publish.names.dconf = Some(name.clone());
        }
        if self.camera.is_some() {
            config.capture.camera = self.camera;
        }
        if let Some(gpu) = self.gpu {
            config.capture.gpu = gpu;
        }
        if let Some(view) = self.view {
            config.capture.view = view;
        }
        if self.synthetic {
            config.capture.backend = CaptureBackend::Synthetic;
        }
        config.publish.measurements |= self.measurements;
        config.preview.enabled |= self.verbose;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileError;
    use crate::shm::buffer::tests::unique_name;
    use crate::shm::SharedFrameBuffer;
    use crate::SegmentKind;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let cli = Cli::parse_from([
            "zedshm",
            "--profile",
            "672x376@60",
            "--name",
            "zed",
            "--mode",
            "side-by-side",
            "--measurements",
            "--verbose",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.capture.profile.fps, 60);
        assert_eq!(config.capture.view, ColorView::SideBySide);
        assert_eq!(config.publish.name, "zed");
        assert!(config.publish.measurements);
        assert!(config.preview.enabled);
    }

    #[test]
    fn unknown_profile_fails() {
        let cli = Cli {
            profile: Some("800x600@30".into()),
            ..Default::default()
        };
        let err = cli.apply(&mut Config::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Profile(ProfileError::Unsupported(_))));
    }

    #[test]
    fn dotted_segment_names_are_accepted() {
        let cli = Cli::parse_from([
            "zedshm",
            "--name.i420",
            "cam.yuv",
            "--name.argb",
            "cam.bgra",
            "--name-xyz",
            "cam.points",
            "--name.dconf",
            "cam.conf",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();

        let publish = &config.publish;
        assert_eq!(publish.segment_name(SegmentKind::I420), "cam.yuv");
        assert_eq!(publish.segment_name(SegmentKind::Argb), "cam.bgra");
        assert_eq!(publish.segment_name(SegmentKind::Xyz), "cam.points");
        assert_eq!(publish.segment_name(SegmentKind::Dconf), "cam.conf");
    }

    #[test]
    fn bad_profile_fails_before_any_segment_exists() {
        let name = unique_name("badprofile");
        let cli = Cli {
            profile: Some("1024x768@30".into()),
            name: Some(name.clone()),
            synthetic: true,
            measurements: true,
            ..Default::default()
        };
        assert!(matches!(cli.resolve(), Err(SettingsError::Profile(_))));

        let publish = crate::PublishConfig {
            name,
            ..Default::default()
        };
        for kind in [SegmentKind::I420, SegmentKind::Argb, SegmentKind::Xyz, SegmentKind::Dconf] {
            assert!(SharedFrameBuffer::open(&publish.segment_name(kind)).is_err());
        }
    }
}
