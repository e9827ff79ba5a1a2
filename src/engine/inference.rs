//! The four networks as seen by the detection pipeline

use anyhow::{Context, Result};
use image::DynamicImage;

use super::attribute::{self, AgeGender};
use super::detector::{self, FaceBox};
use super::embedder;
use super::landmarks::{self, FaceLandmarks};
use super::loader::OpenVinoModel;
use super::registry::ModelSet;
use crate::service::types::DetectionOptions;

/// Inference over a loaded model set. All calls are blocking.
pub trait FaceModels: Send + Sync + 'static {
    fn detect(&self, image: &DynamicImage, options: &DetectionOptions) -> Result<Vec<FaceBox>>;

    fn landmarks(&self, image: &DynamicImage, face: &FaceBox) -> Result<FaceLandmarks>;

    fn age_gender(&self, aligned_face: &DynamicImage) -> Result<AgeGender>;

    fn descriptor(&self, aligned_face: &DynamicImage) -> Result<Vec<f32>>;

    fn has_recognition(&self) -> bool;
}

impl FaceModels for ModelSet<OpenVinoModel> {
    fn detect(&self, image: &DynamicImage, options: &DetectionOptions) -> Result<Vec<FaceBox>> {
        detector::detect(&self.detector, image, options)
    }

    fn landmarks(&self, image: &DynamicImage, face: &FaceBox) -> Result<FaceLandmarks> {
        landmarks::estimate(&self.landmarks, image, face)
    }

    fn age_gender(&self, aligned_face: &DynamicImage) -> Result<AgeGender> {
        attribute::estimate(&self.age_gender, aligned_face)
    }

    fn descriptor(&self, aligned_face: &DynamicImage) -> Result<Vec<f32>> {
        let model = self
            .recognition
            .as_ref()
            .context("recognition model is not configured")?;
        embedder::describe(model, aligned_face)
    }

    fn has_recognition(&self) -> bool {
        self.recognition.is_some()
    }
}
