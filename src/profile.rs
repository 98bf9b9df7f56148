//! Camera resolution / frame-rate profiles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resolutions the stereo camera exposes, with the frame rates each supports.
const SUPPORTED: &[(u32, u32, &[u32])] = &[
    (2208, 1242, &[15]),
    (1920, 1080, &[15, 30]),
    (1280, 720, &[15, 30, 60]),
    (672, 376, &[15, 30, 60, 100]),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("malformed profile {0:?}, expected <width>x<height>@<fps>")]
    Malformed(String),
    #[error("unsupported profile {0:?}")]
    Unsupported(String),
}

/// Immutable capture profile, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Profile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Profile {
    /// Every profile the camera accepts, largest first
    pub fn all() -> impl Iterator<Item = Profile> {
        SUPPORTED.iter().flat_map(|&(width, height, rates)| {
            rates.iter().map(move |&fps| Profile { width, height, fps })
        })
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl FromStr for Profile {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProfileError::Malformed(s.to_string());

        let (size, fps) = s.trim().split_once('@').ok_or_else(malformed)?;
        let (width, height) = size.split_once(['x', 'X']).ok_or_else(malformed)?;

        let profile = Profile {
            width: width.parse().map_err(|_| malformed())?,
            height: height.parse().map_err(|_| malformed())?,
            fps: fps.parse().map_err(|_| malformed())?,
        };

        if Profile::all().any(|p| p == profile) {
            Ok(profile)
        } else {
            Err(ProfileError::Unsupported(s.to_string()))
        }
    }
}

impl TryFrom<String> for Profile {
    type Error = ProfileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Profile> for String {
    fn from(profile: Profile) -> Self {
        profile.to_string()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hd720_at_30() {
        let profile: Profile = "1280x720@30".parse().unwrap();
        assert_eq!(profile.width, 1280);
        assert_eq!(profile.height, 720);
        assert_eq!(profile.fps, 30);
    }

    #[test]
    fn rejects_unknown_combination() {
        assert_eq!(
            "1280x720@100".parse::<Profile>(),
            Err(ProfileError::Unsupported("1280x720@100".into()))
        );
        assert_eq!(
            "2208x1242@30".parse::<Profile>(),
            Err(ProfileError::Unsupported("2208x1242@30".into()))
        );
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "hd720", "1280x720", "1280@30", "axb@c", "1280x720@"] {
            assert!(
                matches!(s.parse::<Profile>(), Err(ProfileError::Malformed(_))),
                "{s:?} should be malformed"
            );
        }
    }

    #[test]
    fn every_profile_round_trips_through_display() {
        assert_eq!(Profile::all().count(), 10);
        for profile in Profile::all() {
            assert_eq!(profile.to_string().parse::<Profile>(), Ok(profile));
        }
    }
}
