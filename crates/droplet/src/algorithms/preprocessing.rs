use image::GrayImage;
use imageproc::distance_transform::Norm;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{error::Result, traits::ImagePreprocessor};

/// Which side of the threshold is droplet
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Polarity {
    /// Dark silhouette against a bright backlight
    #[default]
    Dark,
    /// Bright droplet against a dark background
    Bright,
}

/// Binarize `image` at `level`, mapping the droplet side to 255
fn binarize(image: &GrayImage, level: u8, polarity: Polarity) -> GrayImage {
    let mut mask = imageproc::contrast::threshold(image, level);
    if polarity == Polarity::Dark {
        image::imageops::invert(&mut mask);
    }
    mask
}

/// Automatic Otsu binarization, robust to exposure changes between images
#[derive(Debug, Clone)]
pub struct OtsuBinarizer {
    pub polarity: Polarity,
    /// Below this intensity range the image is treated as empty
    pub min_contrast: u8,
}

impl Default for OtsuBinarizer {
    fn default() -> Self {
        Self {
            polarity: Polarity::Dark,
            min_contrast: 20,
        }
    }
}

impl ImagePreprocessor for OtsuBinarizer {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage> {
        let (lo, hi) = image
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        if hi.saturating_sub(lo) < self.min_contrast {
            tracing::debug!(lo, hi, "intensity range too narrow, no foreground");
            return Ok(GrayImage::new(image.width(), image.height()));
        }

        let level = imageproc::contrast::otsu_level(image);
        tracing::debug!(level, "otsu threshold");
        Ok(binarize(image, level, self.polarity))
    }
}

/// Fixed-level binarization for controlled lighting
#[derive(Debug, Clone)]
pub struct ThresholdBinarizer {
    pub threshold: u8,
    pub polarity: Polarity,
}

impl Default for ThresholdBinarizer {
    fn default() -> Self {
        Self {
            threshold: 128,
            polarity: Polarity::Dark,
        }
    }
}

impl ImagePreprocessor for ThresholdBinarizer {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage> {
        Ok(binarize(image, self.threshold, self.polarity))
    }
}

/// Gaussian blur preprocessor for noise reduction
#[derive(Debug, Clone)]
pub struct GaussianBlurPreprocessor {
    pub sigma: f32,
}

impl Default for GaussianBlurPreprocessor {
    fn default() -> Self {
        Self { sigma: 1.0 }
    }
}

impl ImagePreprocessor for GaussianBlurPreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage> {
        Ok(imageproc::filter::gaussian_blur_f32(image, self.sigma))
    }
}

/// Morphological closing of a binary mask with a square structuring element
#[derive(Debug, Clone)]
pub struct ClosingPreprocessor {
    pub radius: u8,
}

impl Default for ClosingPreprocessor {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

impl ImagePreprocessor for ClosingPreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage> {
        if self.radius == 0 {
            return Ok(image.clone());
        }
        Ok(imageproc::morphology::close(image, Norm::LInf, self.radius))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn two_tone() -> GrayImage {
        GrayImage::from_fn(40, 30, |x, _| if (10..20).contains(&x) { Luma([30u8]) } else { Luma([210u8]) })
    }

    #[test]
    fn otsu_marks_dark_droplet_as_foreground() {
        let mask = OtsuBinarizer::default().preprocess(&two_tone()).unwrap();
        assert_eq!(mask.get_pixel(15, 5)[0], 255);
        assert_eq!(mask.get_pixel(2, 5)[0], 0);
    }

    #[test]
    fn otsu_bright_polarity_flips_mask() {
        let binarizer = OtsuBinarizer {
            polarity: Polarity::Bright,
            ..Default::default()
        };
        let mask = binarizer.preprocess(&two_tone()).unwrap();
        assert_eq!(mask.get_pixel(15, 5)[0], 0);
        assert_eq!(mask.get_pixel(2, 5)[0], 255);
    }

    #[test]
    fn flat_image_has_no_foreground() {
        let flat = GrayImage::from_pixel(20, 20, Luma([200u8]));
        let mask = OtsuBinarizer::default().preprocess(&flat).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn closing_fills_single_pixel_hole() {
        let mut mask = GrayImage::from_pixel(9, 9, Luma([255u8]));
        mask.put_pixel(4, 4, Luma([0u8]));
        let closed = ClosingPreprocessor::default().preprocess(&mask).unwrap();
        assert_eq!(closed.get_pixel(4, 4)[0], 255);
    }
}
