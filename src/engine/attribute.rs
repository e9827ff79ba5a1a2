//! Age and Gender Estimator
//!
//! Runs on the aligned face crop. The network has two heads: a single age
//! regression value and two gender logits in `[male, female]` order.

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Serialize;

use super::landmarks::FACE_MEAN_RGB;
use super::loader::{output_count, read_output, OpenVinoModel};
use super::preprocess::image_to_nchw;
use crate::utils::math::{argmax, softmax};

pub const AGE_GENDER_INPUT_SIZE: u32 = 112;

/// Gender classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => Gender::Male,
            _ => Gender::Female,
        }
    }
}

/// Age and gender estimate for one face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeGender {
    pub age: f32,
    pub gender: Gender,
    /// Probability of the predicted gender, in `[0.5, 1]`
    pub gender_probability: f32,
}

/// Combine the two heads into an estimate
pub fn parse_outputs(age: &[f32], gender_logits: &[f32]) -> Result<AgeGender> {
    let age = *age.first().context("age output is empty")?;
    if gender_logits.len() != 2 {
        anyhow::bail!("expected 2 gender logits, got {}", gender_logits.len());
    }

    let probs = softmax(gender_logits);
    let idx = argmax(&probs);

    Ok(AgeGender {
        age: age.max(0.0),
        gender: Gender::from_index(idx),
        gender_probability: probs[idx],
    })
}

/// Estimate age and gender from an aligned face image
pub fn estimate(model: &OpenVinoModel, aligned_face: &DynamicImage) -> Result<AgeGender> {
    let resized = aligned_face.resize_exact(
        AGE_GENDER_INPUT_SIZE,
        AGE_GENDER_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    let input = image_to_nchw(&resized, FACE_MEAN_RGB, 255.0);

    let request = model.infer(&input)?;

    // Output order differs between exports, so pick heads by size
    let mut age = None;
    let mut gender = None;
    for index in 0..output_count(&request) {
        let (_, values) = read_output(&request, index)?;
        match values.len() {
            1 => age = Some(values),
            2 => gender = Some(values),
            _ => {}
        }
    }

    parse_outputs(
        &age.context("age/gender model has no age output")?,
        &gender.context("age/gender model has no gender output")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_male() {
        let result = parse_outputs(&[31.6], &[2.0, 0.0]).unwrap();
        assert_eq!(result.gender, Gender::Male);
        assert!((result.age - 31.6).abs() < 1e-6);
        assert!((result.gender_probability - 0.880797).abs() < 1e-4);
    }

    #[test]
    fn test_parse_female() {
        let result = parse_outputs(&[24.0], &[-1.0, 1.0]).unwrap();
        assert_eq!(result.gender, Gender::Female);
        assert!(result.gender_probability > 0.5);
    }

    #[test]
    fn test_negative_age_clamped() {
        let result = parse_outputs(&[-3.0], &[0.0, 1.0]).unwrap();
        assert_eq!(result.age, 0.0);
    }

    #[test]
    fn test_parse_rejects_bad_heads() {
        assert!(parse_outputs(&[], &[0.0, 1.0]).is_err());
        assert!(parse_outputs(&[30.0], &[0.0, 1.0, 2.0]).is_err());
    }

    #[test]
    fn test_gender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"female\"");
        assert_eq!(Gender::Male.as_str(), "male");
    }
}
