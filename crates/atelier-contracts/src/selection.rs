use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assets::ImageAsset;

pub const MAX_GARMENTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseOption {
    #[default]
    Original,
    Replicate,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitOption {
    Slim,
    #[default]
    Regular,
    Loose,
    Baggy,
    Oversized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundOption {
    #[default]
    Custom,
    Outfit,
}

impl PoseOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Replicate => "replicate",
            Self::Custom => "custom",
        }
    }
}

impl FitOption {
    pub const ALL: [FitOption; 5] = [
        Self::Slim,
        Self::Regular,
        Self::Loose,
        Self::Baggy,
        Self::Oversized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slim => "slim",
            Self::Regular => "regular",
            Self::Loose => "loose",
            Self::Baggy => "baggy",
            Self::Oversized => "oversized",
        }
    }
}

impl BackgroundOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Outfit => "outfit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("at most 4 garment images are supported ({requested} requested)")]
    TooManyGarments { requested: usize },
    #[error("no garment image at position {index} ({count} loaded)")]
    GarmentOutOfRange { index: usize, count: usize },
    #[error("unknown {kind} option '{value}'")]
    UnknownOption { kind: &'static str, value: String },
}

impl FromStr for PoseOption {
    type Err = SelectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" | "keep" => Ok(Self::Original),
            "replicate" | "outfit" => Ok(Self::Replicate),
            "custom" => Ok(Self::Custom),
            other => Err(SelectionError::UnknownOption {
                kind: "pose",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for FitOption {
    type Err = SelectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|fit| fit.as_str() == lowered)
            .ok_or(SelectionError::UnknownOption {
                kind: "fit",
                value: lowered,
            })
    }
}

impl FromStr for BackgroundOption {
    type Err = SelectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "custom" => Ok(Self::Custom),
            "outfit" => Ok(Self::Outfit),
            other => Err(SelectionError::UnknownOption {
                kind: "background",
                value: other.to_string(),
            }),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(PoseOption, FitOption, BackgroundOption);

/// Unversioned user choices: the person photo, garment references and option toggles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    person: Option<ImageAsset>,
    garments: Vec<ImageAsset>,
    pose: PoseOption,
    custom_pose_text: String,
    fit: FitOption,
    background: BackgroundOption,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replacing the person photo restores every option to its default.
    pub fn set_person(&mut self, person: Option<ImageAsset>) {
        *self = Self {
            person,
            ..Self::default()
        };
    }

    /// Appends garment references. Returns `false` (and changes nothing) for an empty batch.
    pub fn add_garments(&mut self, garments: Vec<ImageAsset>) -> Result<bool, SelectionError> {
        if garments.is_empty() {
            return Ok(false);
        }
        let requested = self.garments.len() + garments.len();
        if requested > MAX_GARMENTS {
            return Err(SelectionError::TooManyGarments { requested });
        }
        self.garments.extend(garments);
        Ok(true)
    }

    /// Removing the last garment drops the outfit background; the pose choice is left as is.
    pub fn remove_garment(&mut self, index: usize) -> Result<ImageAsset, SelectionError> {
        if index >= self.garments.len() {
            return Err(SelectionError::GarmentOutOfRange {
                index,
                count: self.garments.len(),
            });
        }
        let removed = self.garments.remove(index);
        if self.garments.is_empty() {
            self.background = BackgroundOption::Custom;
        }
        Ok(removed)
    }

    pub fn set_pose(&mut self, pose: PoseOption) {
        self.pose = pose;
    }

    pub fn set_custom_pose_text(&mut self, text: impl Into<String>) {
        self.custom_pose_text = text.into();
    }

    pub fn set_fit(&mut self, fit: FitOption) {
        self.fit = fit;
    }

    pub fn set_background(&mut self, background: BackgroundOption) {
        self.background = background;
    }

    pub fn person(&self) -> Option<&ImageAsset> {
        self.person.as_ref()
    }

    pub fn garments(&self) -> &[ImageAsset] {
        &self.garments
    }

    pub fn has_garments(&self) -> bool {
        !self.garments.is_empty()
    }

    pub fn pose(&self) -> PoseOption {
        self.pose
    }

    pub fn custom_pose_text(&self) -> &str {
        &self.custom_pose_text
    }

    pub fn fit(&self) -> FitOption {
        self.fit
    }

    pub fn background(&self) -> BackgroundOption {
        self.background
    }

    pub fn has_custom_pose(&self) -> bool {
        self.pose == PoseOption::Custom && !self.custom_pose_text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::assets::{ImageAsset, MimeType};

    use super::{
        BackgroundOption, FitOption, PoseOption, SelectionError, SelectionState, MAX_GARMENTS,
    };

    fn asset(tag: u8) -> ImageAsset {
        ImageAsset::new(vec![tag], MimeType::Png)
    }

    #[test]
    fn setting_person_resets_options() {
        let mut selection = SelectionState::new();
        selection.add_garments(vec![asset(1)]).unwrap();
        selection.set_pose(PoseOption::Custom);
        selection.set_custom_pose_text("arms crossed");
        selection.set_fit(FitOption::Baggy);
        selection.set_background(BackgroundOption::Outfit);

        selection.set_person(Some(asset(7)));
        assert_eq!(selection.person(), Some(&asset(7)));
        assert!(selection.garments().is_empty());
        assert_eq!(selection.pose(), PoseOption::Original);
        assert_eq!(selection.custom_pose_text(), "");
        assert_eq!(selection.fit(), FitOption::Regular);
        assert_eq!(selection.background(), BackgroundOption::Custom);
    }

    #[test]
    fn add_garments_appends_and_enforces_limit() {
        let mut selection = SelectionState::new();
        assert_eq!(selection.add_garments(Vec::new()), Ok(false));
        assert_eq!(selection.add_garments(vec![asset(1), asset(2)]), Ok(true));
        assert_eq!(selection.add_garments(vec![asset(3)]), Ok(true));
        assert_eq!(selection.garments(), &[asset(1), asset(2), asset(3)]);
        assert_eq!(
            selection.add_garments(vec![asset(4), asset(5)]),
            Err(SelectionError::TooManyGarments { requested: 5 })
        );
        assert_eq!(selection.garments().len(), 3);
        assert_eq!(selection.add_garments(vec![asset(4)]), Ok(true));
        assert_eq!(selection.garments().len(), MAX_GARMENTS);
    }

    #[test]
    fn removing_last_garment_resets_background_but_not_pose() {
        let mut selection = SelectionState::new();
        selection.add_garments(vec![asset(1), asset(2)]).unwrap();
        selection.set_pose(PoseOption::Replicate);
        selection.set_background(BackgroundOption::Outfit);

        assert_eq!(selection.remove_garment(0), Ok(asset(1)));
        assert_eq!(selection.background(), BackgroundOption::Outfit);

        assert_eq!(selection.remove_garment(0), Ok(asset(2)));
        assert_eq!(selection.background(), BackgroundOption::Custom);
        assert_eq!(selection.pose(), PoseOption::Replicate);

        assert_eq!(
            selection.remove_garment(0),
            Err(SelectionError::GarmentOutOfRange { index: 0, count: 0 })
        );
    }

    #[test]
    fn custom_pose_requires_text() {
        let mut selection = SelectionState::new();
        selection.set_pose(PoseOption::Custom);
        assert!(!selection.has_custom_pose());
        selection.set_custom_pose_text("   ");
        assert!(!selection.has_custom_pose());
        selection.set_custom_pose_text("hands in pockets");
        assert!(selection.has_custom_pose());
    }

    #[test]
    fn options_parse_from_cli_words() {
        assert_eq!("Replicate".parse::<PoseOption>(), Ok(PoseOption::Replicate));
        assert_eq!("oversized".parse::<FitOption>(), Ok(FitOption::Oversized));
        assert_eq!("outfit".parse::<BackgroundOption>(), Ok(BackgroundOption::Outfit));
        assert!("skinny".parse::<FitOption>().is_err());
        assert_eq!(FitOption::Loose.to_string(), "loose");
    }
}
