//! Image preprocessing shared by the face models

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb};
use ndarray::Array4;
use serde::Serialize;

/// Axis-aligned rectangle in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Integer crop window clipped to an image, `None` if nothing is left
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = self.y.max(0.0).floor() as u32;
        let x2 = ((self.x + self.width).ceil().max(0.0) as u32).min(image_width);
        let y2 = ((self.y + self.height).ceil().max(0.0) as u32).min(image_height);

        if x2 > x1 && y2 > y1 {
            Some((x1, y1, x2 - x1, y2 - y1))
        } else {
            None
        }
    }
}

/// How an image was scaled and padded into a square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    /// `centered` places the image in the middle of the square,
    /// otherwise it sits in the top-left corner
    pub fn new(original: (u32, u32), target: u32, centered: bool) -> Self {
        let (orig_w, orig_h) = original;
        let scale = target as f32 / orig_w.max(orig_h).max(1) as f32;

        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target);

        let (offset_x, offset_y) = if centered {
            ((target - new_w) / 2, (target - new_h) / 2)
        } else {
            (0, 0)
        };

        Self {
            scale,
            offset_x,
            offset_y,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    fn scaled_size(&self) -> (u32, u32) {
        (
            ((self.original_width as f32 * self.scale) as u32).max(1),
            ((self.original_height as f32 * self.scale) as u32).max(1),
        )
    }

    /// Convert model-input coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }
}

/// Resize into a `target`x`target` square, padding with black
pub fn resize_with_padding(
    image: &DynamicImage,
    target: u32,
    centered: bool,
) -> (DynamicImage, ResizeInfo) {
    let info = ResizeInfo::new(image.dimensions(), target, centered);
    let (new_w, new_h) = info.scaled_size();

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut padded = ImageBuffer::from_pixel(target, target, Rgb([0u8, 0, 0]));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (px, py) = (x + info.offset_x, y + info.offset_y);
        if px < target && py < target {
            padded.put_pixel(px, py, *pixel);
        }
    }

    (DynamicImage::ImageRgb8(padded), info)
}

/// Convert image to an RGB NCHW tensor: `(pixel - mean) / divisor`
pub fn image_to_nchw(image: &DynamicImage, mean_rgb: [f32; 3], divisor: f32) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - mean_rgb[c]) / divisor;
        }
    }

    tensor
}

/// Crop a rectangle clipped to the image, returning the crop and its origin
pub fn crop(image: &DynamicImage, rect: &Rect) -> Option<(DynamicImage, (u32, u32))> {
    let (x, y, w, h) = rect.clip_to(image.width(), image.height())?;
    Some((image.crop_imm(x, y, w, h), (x, y)))
}
