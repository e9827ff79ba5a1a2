//! Tiny Face Detector
//!
//! Real-time oriented single-class YOLOv2-style detector. The network sees a
//! square input (416 by default) and predicts 5 anchor boxes per grid cell.

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use serde::Serialize;

use super::loader::{read_output, OpenVinoModel};
use super::preprocess::{image_to_nchw, resize_with_padding, Rect, ResizeInfo};
use crate::service::types::DetectionOptions;
use crate::utils::math::{iou, sigmoid};

/// Per-channel RGB mean subtracted before inference
pub const DETECTOR_MEAN_RGB: [f32; 3] = [117.001, 114.697, 97.404];

/// Anchor sizes in grid-cell units
const ANCHORS: [(f32, f32); 5] = [
    (1.603231, 2.094468),
    (6.041143, 7.080126),
    (2.882459, 3.518061),
    (4.266906, 5.178857),
    (9.041765, 10.66308),
];

/// tx, ty, tw, th, score
const BOX_VALUES: usize = 5;
const GRID_CHANNELS: usize = ANCHORS.len() * BOX_VALUES;

/// Face detection result in original image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

impl FaceBox {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    fn as_tuple(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.width, self.height)
    }
}

/// Pad to a square (image in the top-left corner), resize, normalize
pub fn preprocess(image: &DynamicImage, input_size: u32) -> (Array4<f32>, ResizeInfo) {
    let (padded, info) = resize_with_padding(image, input_size, false);
    (image_to_nchw(&padded, DETECTOR_MEAN_RGB, 256.0), info)
}

/// Run the detector and return faces sorted by descending score
pub fn detect(
    model: &OpenVinoModel,
    image: &DynamicImage,
    options: &DetectionOptions,
) -> Result<Vec<FaceBox>> {
    let (input, resize_info) = preprocess(image, options.input_size);
    let request = model.infer(&input)?;
    let (dims, grid) = read_output(&request, 0)?;

    let candidates = decode_grid(&grid, &dims, options, &resize_info)?;
    tracing::debug!(
        "{} candidates above threshold {}",
        candidates.len(),
        options.score_threshold
    );

    let faces = nms(candidates, options.iou_threshold);
    tracing::debug!(
        "Detected {} faces in {}x{} image",
        faces.len(),
        image.width(),
        image.height()
    );

    Ok(faces)
}

/// Decode the raw output grid into boxes above the score threshold.
///
/// Accepts both `[1, cells, cells, 25]` and `[1, 25, cells, cells]` layouts.
pub fn decode_grid(
    grid: &[f32],
    dims: &[i64],
    options: &DetectionOptions,
    resize_info: &ResizeInfo,
) -> Result<Vec<FaceBox>> {
    if dims.len() != 4 {
        anyhow::bail!("unexpected detector output rank {:?}", dims);
    }

    let channels_last = dims[3] as usize == GRID_CHANNELS;
    let (rows, cols) = if channels_last {
        (dims[1] as usize, dims[2] as usize)
    } else if dims[1] as usize == GRID_CHANNELS {
        (dims[2] as usize, dims[3] as usize)
    } else {
        anyhow::bail!("unexpected detector output shape {:?}", dims);
    };

    if grid.len() < rows * cols * GRID_CHANNELS {
        anyhow::bail!("detector output too short: {} values", grid.len());
    }

    let value = |row: usize, col: usize, channel: usize| -> f32 {
        if channels_last {
            grid[(row * cols + col) * GRID_CHANNELS + channel]
        } else {
            grid[channel * rows * cols + row * cols + col]
        }
    };

    let cell_w = options.input_size as f32 / cols as f32;
    let cell_h = options.input_size as f32 / rows as f32;
    let (img_w, img_h) = (
        resize_info.original_width as f32,
        resize_info.original_height as f32,
    );

    let mut boxes = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            for (anchor, &(anchor_w, anchor_h)) in ANCHORS.iter().enumerate() {
                let base = anchor * BOX_VALUES;
                let score = sigmoid(value(row, col, base + 4));
                if score < options.score_threshold {
                    continue;
                }

                let cx = (col as f32 + sigmoid(value(row, col, base))) * cell_w;
                let cy = (row as f32 + sigmoid(value(row, col, base + 1))) * cell_h;
                let w = value(row, col, base + 2).exp() * anchor_w * cell_w;
                let h = value(row, col, base + 3).exp() * anchor_h * cell_h;

                let (x1, y1) = resize_info.to_original(cx - w / 2.0, cy - h / 2.0);
                let (x2, y2) = resize_info.to_original(cx + w / 2.0, cy + h / 2.0);

                let x1 = x1.clamp(0.0, img_w);
                let y1 = y1.clamp(0.0, img_h);
                let x2 = x2.clamp(0.0, img_w);
                let y2 = y2.clamp(0.0, img_h);

                if x2 <= x1 || y2 <= y1 {
                    continue;
                }

                boxes.push(FaceBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    score,
                });
            }
        }
    }

    Ok(boxes)
}

/// Non-maximum suppression, highest score first
pub fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|kept| iou(kept.as_tuple(), candidate.as_tuple()) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DetectionOptions {
        DetectionOptions {
            input_size: 64,
            score_threshold: 0.5,
            iou_threshold: 0.4,
        }
    }

    /// 2x2 grid, channels last, every score strongly negative
    fn empty_grid() -> Vec<f32> {
        let mut grid = vec![0.0; 2 * 2 * GRID_CHANNELS];
        for cell in 0..4 {
            for anchor in 0..ANCHORS.len() {
                grid[cell * GRID_CHANNELS + anchor * BOX_VALUES + 4] = -10.0;
            }
        }
        grid
    }

    fn face(x: f32, y: f32, size: f32, score: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: size,
            height: size,
            score,
        }
    }

    #[test]
    fn test_decode_empty_grid() {
        let info = ResizeInfo::new((64, 64), 64, false);
        let boxes = decode_grid(&empty_grid(), &[1, 2, 2, 25], &options(), &info).unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_decode_single_box_channels_last() {
        let mut grid = empty_grid();
        // cell (row 1, col 1), anchor 0: centered offsets, quarter anchor size
        let base = 3 * GRID_CHANNELS;
        let quarter = 0.25f32.ln();
        grid[base + 2] = quarter;
        grid[base + 3] = quarter;
        grid[base + 4] = 5.0;

        // Original image is twice the input size
        let info = ResizeInfo::new((128, 128), 64, false);
        let boxes = decode_grid(&grid, &[1, 2, 2, 25], &options(), &info).unwrap();
        assert_eq!(boxes.len(), 1);

        let b = boxes[0];
        // cell is 32 px so the center is (48, 48) in input space
        let w = ANCHORS[0].0 * 0.25 * 32.0;
        let h = ANCHORS[0].1 * 0.25 * 32.0;
        assert!((b.x - (48.0 - w / 2.0) * 2.0).abs() < 1e-3);
        assert!((b.y - (48.0 - h / 2.0) * 2.0).abs() < 1e-3);
        assert!((b.width - w * 2.0).abs() < 1e-3);
        assert!(b.score > 0.99);
    }

    #[test]
    fn test_decode_channels_first_matches() {
        let mut last = empty_grid();
        last[3 * GRID_CHANNELS + 2 * BOX_VALUES + 4] = 3.0;

        // Transpose to [1, 25, 2, 2]
        let mut first = vec![0.0; last.len()];
        for cell in 0..4 {
            for ch in 0..GRID_CHANNELS {
                first[ch * 4 + cell] = last[cell * GRID_CHANNELS + ch];
            }
        }

        let info = ResizeInfo::new((64, 64), 64, false);
        let a = decode_grid(&last, &[1, 2, 2, 25], &options(), &info).unwrap();
        let b = decode_grid(&first, &[1, 25, 2, 2], &options(), &info).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        let info = ResizeInfo::new((64, 64), 64, false);
        assert!(decode_grid(&[0.0; 16], &[1, 4, 2, 2], &options(), &info).is_err());
    }

    #[test]
    fn test_nms_suppresses_overlap_and_orders_by_score() {
        let boxes = vec![
            face(0.0, 0.0, 10.0, 0.7),
            face(1.0, 1.0, 10.0, 0.9),
            face(50.0, 50.0, 10.0, 0.6),
        ];
        let kept = nms(boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.6);
    }

    #[test]
    fn test_nms_keeps_low_overlap() {
        // IoU ~0.143, below threshold
        let kept = nms(
            vec![face(0.0, 0.0, 10.0, 0.9), face(5.0, 5.0, 10.0, 0.8)],
            0.4,
        );
        assert_eq!(kept.len(), 2);
    }
}
