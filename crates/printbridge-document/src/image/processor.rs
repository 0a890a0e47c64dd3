// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: decode, flatten transparency, fit onto a media canvas,
// and reduce to bilevel for thermal heads. Operates on in-memory images using
// the `image` and `imageproc` crates.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use printbridge_core::Threshold;
use printbridge_core::error::{PrintBridgeError, Result};
use tracing::{debug, instrument};

/// Image processing pipeline operating on a single in-memory image.
///
/// Each method consumes `self` and returns a new `ImageProcessor` wrapping
/// the transformed image, enabling method chaining.
///
/// ```ignore
/// let page = ImageProcessor::from_bytes(&png)?
///     .flatten_alpha()
///     .fit_to_canvas(696, 271)
///     .into_gray();
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Create a processor from raw encoded bytes (PNG, JPEG, GIF, BMP, TIFF).
    ///
    /// Undecodable input is reported as an unsupported format, so a client
    /// that lies about its content type gets the same error as one that
    /// sends a format we never handle.
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data).map_err(|err| {
            PrintBridgeError::UnsupportedFormat(format!("failed to decode image: {err}"))
        })?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    pub fn into_gray(self) -> GrayImage {
        self.image.into_luma8()
    }

    pub fn into_rgb(self) -> RgbImage {
        self.image.into_rgb8()
    }

    // -- Transformations ------------------------------------------------------

    /// Composite any transparency onto white paper.
    pub fn flatten_alpha(self) -> Self {
        if !self.image.color().has_alpha() {
            return self;
        }
        let rgba = self.image.to_rgba8();
        let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let image::Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
            let over_white = |channel: u8| -> u8 {
                let alpha = a as u32;
                ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8
            };
            Rgb([over_white(r), over_white(g), over_white(b)])
        });
        Self {
            image: DynamicImage::ImageRgb8(flattened),
        }
    }

    /// Place the image on a `width` x `height` white canvas.
    ///
    /// The image is downscaled, aspect preserved, until it just covers the
    /// canvas; it is never enlarged. Whatever still overflows is cropped
    /// equally from both sides, and any shortfall is padded equally with
    /// white. An odd remainder goes to the right/bottom edge.
    #[instrument(skip(self), fields(from_w = self.image.width(), from_h = self.image.height()))]
    pub fn fit_to_canvas(self, width: u32, height: u32) -> Self {
        let (src_w, src_h) = (self.image.width(), self.image.height());
        if (src_w, src_h) == (width, height) {
            return self;
        }

        let cover = (width as f64 / src_w as f64).max(height as f64 / src_h as f64);
        let scale = cover.min(1.0);
        let image = if scale < 1.0 {
            let scaled_w = ((src_w as f64 * scale).round() as u32).max(1);
            let scaled_h = ((src_h as f64 * scale).round() as u32).max(1);
            self.image.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3)
        } else {
            self.image
        };

        let (crop_x, pad_x, visible_w) = split_axis(image.width(), width);
        let (crop_y, pad_y, visible_h) = split_axis(image.height(), height);
        debug!(scale, crop_x, crop_y, pad_x, pad_y, "Fitting image to canvas");

        let visible = image.crop_imm(crop_x, crop_y, visible_w, visible_h);
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        imageops::replace(&mut canvas, &visible.to_rgb8(), pad_x as i64, pad_y as i64);

        Self {
            image: DynamicImage::ImageRgb8(canvas),
        }
    }

    /// Mirror left to right.
    pub fn flip_horizontal(self) -> Self {
        Self {
            image: self.image.fliph(),
        }
    }

    /// Reduce to pure black (0) and white (255) pixels.
    #[instrument(skip(self))]
    pub fn bilevel(self, threshold: Threshold) -> GrayImage {
        let mut gray = self.image.into_luma8();
        let level = match threshold {
            // Higher percentages print lighter pixels: 70 prints luma <= 179.
            Threshold::Percent(percent) => {
                let light = ((100 - percent.min(100) as u32) * 255 / 100) as u8;
                255 - light
            }
            Threshold::Otsu => imageproc::contrast::otsu_level(&gray),
        };
        debug!(level, "Bilevel threshold");
        for pixel in gray.pixels_mut() {
            *pixel = if pixel.0[0] <= level { Luma([0]) } else { Luma([255]) };
        }
        gray
    }
}

/// For one axis, return (source offset to crop from, canvas offset to paste
/// at, visible length).
fn split_axis(source: u32, target: u32) -> (u32, u32, u32) {
    if source >= target {
        ((source - target) / 2, 0, target)
    } else {
        (0, (target - source) / 2, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 100x50 image whose columns carry their own x coordinate.
    fn ramp(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            Luma([(x % 200) as u8])
        }))
    }

    #[test]
    fn overflow_is_center_cropped() {
        let fitted = ImageProcessor::from_dynamic(ramp(100, 50))
            .fit_to_canvas(80, 50)
            .into_gray();
        assert_eq!(fitted.dimensions(), (80, 50));
        // 10 columns dropped from each side.
        assert_eq!(fitted.get_pixel(0, 0).0[0], 10);
        assert_eq!(fitted.get_pixel(79, 49).0[0], 89);
    }

    #[test]
    fn shortfall_is_letterboxed_white() {
        let fitted = ImageProcessor::from_dynamic(ramp(100, 50))
            .fit_to_canvas(120, 50)
            .into_gray();
        assert_eq!(fitted.dimensions(), (120, 50));
        for x in 0..10 {
            assert_eq!(fitted.get_pixel(x, 25).0[0], 255);
            assert_eq!(fitted.get_pixel(119 - x, 25).0[0], 255);
        }
        assert_eq!(fitted.get_pixel(10, 25).0[0], 0);
        assert_eq!(fitted.get_pixel(109, 25).0[0], 99);
    }

    #[test]
    fn larger_image_is_downscaled_to_cover() {
        let fitted = ImageProcessor::from_dynamic(ramp(400, 200))
            .fit_to_canvas(100, 100)
            .into_gray();
        assert_eq!(fitted.dimensions(), (100, 100));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let rgba = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 0]));
        let gray = ImageProcessor::from_dynamic(DynamicImage::ImageRgba8(rgba))
            .flatten_alpha()
            .into_gray();
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn percent_threshold_splits_at_darkness() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[0u8, 179, 180][x as usize]]));
        let bw = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(img))
            .bilevel(Threshold::Percent(70));
        assert_eq!(bw.get_pixel(0, 0).0[0], 0);
        assert_eq!(bw.get_pixel(1, 0).0[0], 0);
        assert_eq!(bw.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn garbage_is_unsupported() {
        let err = ImageProcessor::from_bytes(b"not an image").err().unwrap();
        assert!(matches!(err, PrintBridgeError::UnsupportedFormat(_)));
    }
}
