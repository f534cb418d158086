use image::{GrayImage, Luma};
use imageproc::contours::BorderType;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::{
    algorithms::preprocessing::{ClosingPreprocessor, OtsuBinarizer},
    error::{AngleError, Result},
    traits::{EdgeExtractor, ImagePreprocessor},
    types::{Contour, PixelGrid},
};

/// Binarizes the grid through a preprocessing chain, keeps the largest
/// connected foreground region and traces its outer boundary.
pub struct SilhouetteExtractor {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    /// Smallest region, in pixels, accepted as a droplet
    pub min_area: u32,
}

impl SilhouetteExtractor {
    pub fn new(preprocessors: Vec<Box<dyn ImagePreprocessor>>, min_area: u32) -> Self {
        Self {
            preprocessors,
            min_area,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.preprocessors.len()
    }
}

impl Default for SilhouetteExtractor {
    fn default() -> Self {
        Self::new(
            vec![
                Box::new(OtsuBinarizer::default()),
                Box::new(ClosingPreprocessor::default()),
            ],
            500,
        )
    }
}

impl EdgeExtractor for SilhouetteExtractor {
    fn extract(&self, grid: &PixelGrid) -> Result<Contour> {
        let mut mask = grid.as_image().clone();
        for preprocessor in &self.preprocessors {
            mask = preprocessor.preprocess(&mask)?;
        }

        let (region, area) = largest_region(&mask);
        if area < self.min_area {
            return Err(AngleError::NoDropletFound {
                largest_area: area,
                min_area: self.min_area,
            });
        }
        tracing::debug!(area, "isolated droplet region");

        let points = trace_outer_boundary(&region);
        if points.len() < 3 {
            return Err(AngleError::NoDropletFound {
                largest_area: area,
                min_area: self.min_area,
            });
        }
        Ok(Contour::new(points, grid.width(), grid.height()))
    }
}

/// Mask holding only the largest 8-connected foreground region, and its area
fn largest_region(mask: &GrayImage) -> (GrayImage, u32) {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut counts = vec![0u32; max_label + 1];
    for p in labels.pixels() {
        counts[p[0] as usize] += 1;
    }

    // Label 0 is background; ties go to the label found first in raster order
    let best = counts
        .iter()
        .enumerate()
        .skip(1)
        .fold(None, |best: Option<(usize, u32)>, (label, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((label, count)),
        });

    let Some((label, area)) = best else {
        return (GrayImage::new(mask.width(), mask.height()), 0);
    };
    let region = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if labels.get_pixel(x, y)[0] as usize == label {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    (region, area)
}

/// Outer border of a single-region mask as pixel centres
fn trace_outer_boundary(region: &GrayImage) -> Vec<[f64; 2]> {
    imageproc::contours::find_contours::<i32>(region)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .max_by_key(|contour| contour.points.len())
        .map(|contour| {
            contour
                .points
                .iter()
                .map(|p| [f64::from(p.x), f64::from(p.y)])
                .collect()
        })
        .unwrap_or_default()
}
