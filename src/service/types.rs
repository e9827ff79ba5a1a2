//! Service layer types

use serde::Serialize;

use crate::engine::attribute::{AgeGender, Gender};
use crate::engine::detector::FaceBox;
use crate::engine::landmarks::{FaceLandmarks, Point};
use crate::engine::preprocess::Rect;
use crate::engine::registry::ModelKind;
use crate::utils::error::FaceError;

/// Detector options, fixed at process start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            input_size: 416,
            score_threshold: 0.5,
            iou_threshold: 0.4,
        }
    }
}

/// Which model outputs a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
    /// `reco` absent or `0`
    #[default]
    AttributesOnly,
    /// `reco=1`
    DescriptorOnly,
    /// `reco=2`
    Full,
}

impl DetectionMode {
    /// Parse the `reco` query value. Unknown values fall back to the default.
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") => DetectionMode::DescriptorOnly,
            Some("2") => DetectionMode::Full,
            _ => DetectionMode::AttributesOnly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::AttributesOnly => "attributes",
            DetectionMode::DescriptorOnly => "descriptor",
            DetectionMode::Full => "full",
        }
    }

    /// Networks run per request, in order
    pub fn chain(&self) -> &'static [ModelKind] {
        match self {
            DetectionMode::AttributesOnly => &[
                ModelKind::Detector,
                ModelKind::Landmarks,
                ModelKind::AgeGender,
            ],
            DetectionMode::DescriptorOnly => &[
                ModelKind::Detector,
                ModelKind::Landmarks,
                ModelKind::Recognition,
            ],
            DetectionMode::Full => &[
                ModelKind::Detector,
                ModelKind::Landmarks,
                ModelKind::AgeGender,
                ModelKind::Recognition,
            ],
        }
    }

    pub fn needs_age_gender(&self) -> bool {
        self.chain().contains(&ModelKind::AgeGender)
    }

    pub fn needs_descriptor(&self) -> bool {
        self.chain().contains(&ModelKind::Recognition)
    }
}

/// Everything the model chain produced for one face
#[derive(Debug, Clone)]
pub struct RawFace {
    pub detection: FaceBox,
    pub landmarks: FaceLandmarks,
    pub aligned_rect: Rect,
    pub age_gender: Option<AgeGender>,
    pub descriptor: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceAttributes {
    pub age: f32,
    pub gender: Gender,
    pub gender_probability: f32,
}

impl From<AgeGender> for FaceAttributes {
    fn from(value: AgeGender) -> Self {
        Self {
            age: value.age,
            gender: value.gender,
            gender_probability: value.gender_probability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullFaceRecord {
    pub detection: FaceBox,
    pub landmarks: Vec<Point>,
    pub aligned_rect: Rect,
    #[serde(flatten)]
    pub attributes: FaceAttributes,
    pub descriptor: Vec<f32>,
}

/// One element of the response array
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FaceRecord {
    Attributes(FaceAttributes),
    /// Serialized as a bare array of numbers
    Descriptor(Vec<f32>),
    Full(Box<FullFaceRecord>),
}

impl FaceRecord {
    /// Build the mode's output shape from the raw chain results
    pub fn project(mode: DetectionMode, raw: RawFace) -> Result<Self, FaceError> {
        let attributes = || {
            raw.age_gender
                .map(FaceAttributes::from)
                .ok_or_else(|| FaceError::inference("age/gender result missing"))
        };
        let descriptor = |d: Option<Vec<f32>>| {
            d.ok_or_else(|| FaceError::inference("descriptor missing"))
        };

        match mode {
            DetectionMode::AttributesOnly => Ok(FaceRecord::Attributes(attributes()?)),
            DetectionMode::DescriptorOnly => {
                Ok(FaceRecord::Descriptor(descriptor(raw.descriptor)?))
            }
            DetectionMode::Full => {
                let attributes = attributes()?;
                Ok(FaceRecord::Full(Box::new(FullFaceRecord {
                    detection: raw.detection,
                    landmarks: raw.landmarks.points().to_vec(),
                    aligned_rect: raw.aligned_rect,
                    attributes,
                    descriptor: descriptor(raw.descriptor)?,
                })))
            }
        }
    }
}
