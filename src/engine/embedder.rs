//! Face Descriptor
//!
//! ResNet-34 style recognition network producing a 128-dimensional
//! descriptor from the aligned face crop.

use anyhow::Result;
use image::DynamicImage;

use super::landmarks::FACE_MEAN_RGB;
use super::loader::{read_output, OpenVinoModel};
use super::preprocess::image_to_nchw;

pub const DESCRIPTOR_INPUT_SIZE: u32 = 150;
pub const DESCRIPTOR_LEN: usize = 128;

/// Compute the descriptor for an aligned face image
pub fn describe(model: &OpenVinoModel, aligned_face: &DynamicImage) -> Result<Vec<f32>> {
    let resized = aligned_face.resize_exact(
        DESCRIPTOR_INPUT_SIZE,
        DESCRIPTOR_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    let input = image_to_nchw(&resized, FACE_MEAN_RGB, 256.0);

    let request = model.infer(&input)?;
    let (_, values) = read_output(&request, 0)?;

    into_descriptor(values)
}

/// Validate raw network output as a descriptor
pub fn into_descriptor(mut values: Vec<f32>) -> Result<Vec<f32>> {
    if values.len() < DESCRIPTOR_LEN {
        anyhow::bail!(
            "descriptor output has {} values, expected {}",
            values.len(),
            DESCRIPTOR_LEN
        );
    }
    values.truncate(DESCRIPTOR_LEN);

    if values.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("descriptor contains non-finite values");
    }
    Ok(values)
}
