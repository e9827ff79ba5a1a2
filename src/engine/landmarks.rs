//! 68-point face landmark estimator
//!
//! Landmarks are never returned on their own in the default mode; they align
//! the face crop that the age/gender and descriptor models consume.

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Serialize;

use super::detector::FaceBox;
use super::loader::{read_output, OpenVinoModel};
use super::preprocess::{crop, image_to_nchw, resize_with_padding, Rect, ResizeInfo};
use crate::utils::math::centroid;

pub const LANDMARK_INPUT_SIZE: u32 = 112;
pub const LANDMARK_COUNT: usize = 68;

/// RGB mean shared by the landmark, age/gender and recognition networks
pub const FACE_MEAN_RGB: [f32; 3] = [122.782, 117.001, 104.298];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// 68 landmark points in original image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() != LANDMARK_COUNT {
            anyhow::bail!("expected {} landmarks, got {}", LANDMARK_COUNT, points.len());
        }
        Ok(Self { points })
    }

    /// Map the network's `[0, 1]` outputs (relative to the padded crop) back
    /// to image pixels
    pub fn from_relative(
        values: &[f32],
        crop_origin: (f32, f32),
        resize: &ResizeInfo,
    ) -> Result<Self> {
        if values.len() < LANDMARK_COUNT * 2 {
            anyhow::bail!("landmark output too short: {} values", values.len());
        }

        let size = LANDMARK_INPUT_SIZE as f32;
        let points = values
            .chunks_exact(2)
            .take(LANDMARK_COUNT)
            .map(|xy| {
                let (x, y) = resize.to_original(xy[0] * size, xy[1] * size);
                Point {
                    x: x + crop_origin.0,
                    y: y + crop_origin.1,
                }
            })
            .collect();

        Self::new(points)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn region(&self, range: std::ops::Range<usize>) -> Vec<(f32, f32)> {
        self.points[range].iter().map(|p| (p.x, p.y)).collect()
    }

    pub fn left_eye_center(&self) -> (f32, f32) {
        centroid(&self.region(36..42))
    }

    pub fn right_eye_center(&self) -> (f32, f32) {
        centroid(&self.region(42..48))
    }

    pub fn mouth_center(&self) -> (f32, f32) {
        centroid(&self.region(48..68))
    }

    /// Face crop derived from eye and mouth positions, clipped to the image
    pub fn aligned_rect(&self, image_width: u32, image_height: u32) -> Rect {
        let centers = [
            self.left_eye_center(),
            self.right_eye_center(),
            self.mouth_center(),
        ];
        let mouth = centers[2];
        let dist_to_mouth =
            |p: (f32, f32)| ((mouth.0 - p.0).powi(2) + (mouth.1 - p.1).powi(2)).sqrt();

        let eye_to_mouth = (dist_to_mouth(centers[0]) + dist_to_mouth(centers[1])) / 2.0;
        let size = (eye_to_mouth / 0.45).floor().max(1.0);
        let reference = centroid(&centers);

        let x = (reference.0 - 0.5 * size).max(0.0).floor();
        let y = (reference.1 - 0.43 * size).max(0.0).floor();

        Rect::new(
            x,
            y,
            size.min(image_width as f32 - x).max(1.0),
            size.min(image_height as f32 - y).max(1.0),
        )
    }
}

/// Estimate landmarks for one detected face
pub fn estimate(
    model: &OpenVinoModel,
    image: &DynamicImage,
    face: &FaceBox,
) -> Result<FaceLandmarks> {
    let (face_crop, (x, y)) =
        crop(image, &face.rect()).context("face box lies outside the image")?;

    let (padded, resize) = resize_with_padding(&face_crop, LANDMARK_INPUT_SIZE, true);
    let input = image_to_nchw(&padded, FACE_MEAN_RGB, 255.0);

    let request = model.infer(&input)?;
    let (_, values) = read_output(&request, 0)?;

    FaceLandmarks::from_relative(&values, (x as f32, y as f32), &resize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Landmarks with eyes at y=40 and the mouth at y=85
    pub(crate) fn frontal_landmarks() -> FaceLandmarks {
        let mut points = vec![Point { x: 50.0, y: 60.0 }; LANDMARK_COUNT];
        for p in &mut points[36..42] {
            *p = Point { x: 35.0, y: 40.0 };
        }
        for p in &mut points[42..48] {
            *p = Point { x: 65.0, y: 40.0 };
        }
        for p in &mut points[48..68] {
            *p = Point { x: 50.0, y: 85.0 };
        }
        FaceLandmarks::new(points).unwrap()
    }

    #[test]
    fn test_rejects_wrong_count() {
        assert!(FaceLandmarks::new(vec![Point { x: 0.0, y: 0.0 }; 5]).is_err());
    }

    #[test]
    fn test_centers() {
        let landmarks = frontal_landmarks();
        assert_eq!(landmarks.left_eye_center(), (35.0, 40.0));
        assert_eq!(landmarks.right_eye_center(), (65.0, 40.0));
        assert_eq!(landmarks.mouth_center(), (50.0, 85.0));
    }

    #[test]
    fn test_aligned_rect() {
        let rect = frontal_landmarks().aligned_rect(200, 200);
        // eye-to-mouth distance = sqrt(15^2 + 45^2) ~ 47.43, size = floor(47.43 / 0.45) = 105
        assert_eq!(rect.width, 105.0);
        assert_eq!(rect.height, 105.0);
        // reference point (50, 55)
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 9.0);
    }

    #[test]
    fn test_aligned_rect_clipped_to_image() {
        let rect = frontal_landmarks().aligned_rect(80, 60);
        assert_eq!(rect.width, 80.0);
        assert_eq!(rect.height, 51.0);
    }

    #[test]
    fn test_from_relative_maps_to_image() {
        // 100x50 crop padded into 112: scale 1.12, offset y 28
        let resize = ResizeInfo::new((100, 50), LANDMARK_INPUT_SIZE, true);
        let mut values = vec![0.0; LANDMARK_COUNT * 2];
        values[0] = 0.5;
        values[1] = 0.5;

        let landmarks = FaceLandmarks::from_relative(&values, (10.0, 20.0), &resize).unwrap();
        let p = landmarks.points()[0];
        assert!((p.x - 60.0).abs() < 1e-3);
        assert!((p.y - 45.0).abs() < 1e-3);
    }
}
