use image::GrayImage;
use crate::{
    error::Result,
    types::{Baseline, Contour, ContourBranch, PixelGrid, SideMeasurement},
};

/// Trait for image preprocessing algorithms
pub trait ImagePreprocessor: Send + Sync {
    /// Preprocess the input image (e.g., blur, binarize, close)
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage>;
}

/// Turns a pixel grid into the droplet's outer contour
pub trait EdgeExtractor: Send + Sync {
    fn extract(&self, grid: &PixelGrid) -> Result<Contour>;
}

/// Locates the substrate line and the two contact points on it
pub trait BaselineDetector: Send + Sync {
    fn detect(&self, grid: &PixelGrid, contour: &Contour) -> Result<Baseline>;
}

/// Cuts the contour into left and right branches running up from the contacts
pub trait ContourSplitter: Send + Sync {
    fn split(&self, contour: &Contour, baseline: &Baseline) -> Result<(ContourBranch, ContourBranch)>;
}

/// Fits a model to one branch and reports the tangent angle at its contact point
pub trait AngleFitter: Send + Sync {
    fn fit(&self, branch: &ContourBranch, baseline: &Baseline) -> Result<SideMeasurement>;
}
