use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        ApexSplitter, ClosingPreprocessor, FitStrategy, GaussianBlurPreprocessor, OtsuBinarizer, Polarity,
        SilhouetteExtractor, SurfaceLineDetector, TangentFitter, ThresholdBinarizer,
    },
    error::{AngleError, Result},
    pipeline::MAX_PRECISION,
    traits::ImagePreprocessor,
};

/// Tunable parameters of the measurement engine. Every field has a default,
/// so a config file only needs the settings it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// Decimal places the reported angle is rounded to
    pub precision: u32,
    pub extraction: ExtractionConfig,
    pub baseline: BaselineConfig,
    pub splitting: SplittingConfig,
    pub fitting: FittingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: 1,
            extraction: ExtractionConfig::default(),
            baseline: BaselineConfig::default(),
            splitting: SplittingConfig::default(),
            fitting: FittingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractionConfig {
    pub polarity: Polarity,
    /// Gaussian blur applied before binarization
    pub blur_sigma: Option<f32>,
    /// Fixed threshold; Otsu's method is used when unset
    pub fixed_threshold: Option<u8>,
    /// Images with a narrower intensity range are treated as empty
    pub min_contrast: u8,
    /// Radius of the square closing element; 0 disables closing
    pub closing_radius: u8,
    /// Smallest region, in pixels, accepted as the droplet
    pub min_area: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let otsu = OtsuBinarizer::default();
        Self {
            polarity: otsu.polarity,
            blur_sigma: None,
            fixed_threshold: None,
            min_contrast: otsu.min_contrast,
            closing_radius: ClosingPreprocessor::default().radius,
            min_area: SilhouetteExtractor::default().min_area,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BaselineConfig {
    pub search_fraction: f64,
    pub gradient_fraction: f64,
    pub min_support_fraction: f64,
    pub max_tilt_deg: f64,
    pub inlier_tolerance_px: f64,
    pub contact_band_px: f64,
    pub min_contact_width_px: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        let d = SurfaceLineDetector::default();
        Self {
            search_fraction: d.search_fraction,
            gradient_fraction: d.gradient_fraction,
            min_support_fraction: d.min_support_fraction,
            max_tilt_deg: d.max_tilt_deg,
            inlier_tolerance_px: d.inlier_tolerance_px,
            contact_band_px: d.contact_band_px,
            min_contact_width_px: d.min_contact_width_px,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SplittingConfig {
    pub max_branch_points: usize,
    pub min_branch_points: usize,
}

impl Default for SplittingConfig {
    fn default() -> Self {
        let d = ApexSplitter::default();
        Self {
            max_branch_points: d.max_branch_points,
            min_branch_points: d.min_branch_points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FittingConfig {
    pub strategy: FitStrategy,
    pub sphericity_tolerance_px: f64,
    pub sphericity_window_fraction: f64,
    pub max_sphericity_gap_deg: f64,
    pub max_residual_px: f64,
    pub poly_degree: u8,
    pub poly_height_px: f64,
    pub poly_height_fraction: f64,
    pub max_iterations: usize,
}

impl Default for FittingConfig {
    fn default() -> Self {
        let d = TangentFitter::default();
        Self {
            strategy: d.strategy,
            sphericity_tolerance_px: d.sphericity_tolerance_px,
            sphericity_window_fraction: d.sphericity_window_fraction,
            max_sphericity_gap_deg: d.max_sphericity_gap_deg,
            max_residual_px: d.max_residual_px,
            poly_degree: d.poly_degree,
            poly_height_px: d.poly_height_px,
            poly_height_fraction: d.poly_height_fraction,
            max_iterations: d.max_iterations,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file, picked by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(AngleError::InvalidConfig(format!(
                "unsupported config format: {}; use .toml or .json",
                path.display()
            ))),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AngleError::InvalidConfig(e.to_string()))
    }

    /// JSON schema describing the config file layout
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, value: f64| {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(AngleError::InvalidConfig(format!("{name} must be in (0, 1], got {value}")))
            }
        };
        let positive = |name: &str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(AngleError::InvalidConfig(format!("{name} must be positive, got {value}")))
            }
        };

        if let Some(sigma) = self.extraction.blur_sigma {
            positive("extraction.blur_sigma", f64::from(sigma))?;
        }
        if self.extraction.min_area == 0 {
            return Err(AngleError::InvalidConfig("extraction.min_area must be at least 1".into()));
        }

        let b = &self.baseline;
        fraction("baseline.search_fraction", b.search_fraction)?;
        fraction("baseline.gradient_fraction", b.gradient_fraction)?;
        fraction("baseline.min_support_fraction", b.min_support_fraction)?;
        positive("baseline.inlier_tolerance_px", b.inlier_tolerance_px)?;
        positive("baseline.contact_band_px", b.contact_band_px)?;
        positive("baseline.min_contact_width_px", b.min_contact_width_px)?;
        if !(0.0..90.0).contains(&b.max_tilt_deg) {
            return Err(AngleError::InvalidConfig(format!(
                "baseline.max_tilt_deg must be in [0, 90), got {}",
                b.max_tilt_deg
            )));
        }

        let s = &self.splitting;
        if s.min_branch_points < 3 || s.max_branch_points < s.min_branch_points {
            return Err(AngleError::InvalidConfig(format!(
                "splitting needs 3 <= min_branch_points <= max_branch_points, got {} and {}",
                s.min_branch_points, s.max_branch_points
            )));
        }

        let f = &self.fitting;
        positive("fitting.sphericity_tolerance_px", f.sphericity_tolerance_px)?;
        fraction("fitting.sphericity_window_fraction", f.sphericity_window_fraction)?;
        positive("fitting.max_sphericity_gap_deg", f.max_sphericity_gap_deg)?;
        positive("fitting.max_residual_px", f.max_residual_px)?;
        positive("fitting.poly_height_px", f.poly_height_px)?;
        fraction("fitting.poly_height_fraction", f.poly_height_fraction)?;
        if !(2..=3).contains(&f.poly_degree) {
            return Err(AngleError::InvalidConfig(format!(
                "fitting.poly_degree must be 2 or 3, got {}",
                f.poly_degree
            )));
        }
        if f.max_iterations == 0 {
            return Err(AngleError::InvalidConfig("fitting.max_iterations must be at least 1".into()));
        }

        if self.precision > MAX_PRECISION {
            return Err(AngleError::InvalidConfig(format!(
                "precision must be at most {MAX_PRECISION} decimals, got {}",
                self.precision
            )));
        }
        Ok(())
    }
}

impl From<&ExtractionConfig> for SilhouetteExtractor {
    fn from(config: &ExtractionConfig) -> Self {
        let mut chain: Vec<Box<dyn ImagePreprocessor>> = Vec::new();
        if let Some(sigma) = config.blur_sigma {
            chain.push(Box::new(GaussianBlurPreprocessor { sigma }));
        }
        match config.fixed_threshold {
            Some(threshold) => chain.push(Box::new(ThresholdBinarizer {
                threshold,
                polarity: config.polarity,
            })),
            None => chain.push(Box::new(OtsuBinarizer {
                polarity: config.polarity,
                min_contrast: config.min_contrast,
            })),
        }
        if config.closing_radius > 0 {
            chain.push(Box::new(ClosingPreprocessor {
                radius: config.closing_radius,
            }));
        }
        SilhouetteExtractor::new(chain, config.min_area)
    }
}

impl From<&BaselineConfig> for SurfaceLineDetector {
    fn from(config: &BaselineConfig) -> Self {
        Self {
            search_fraction: config.search_fraction,
            gradient_fraction: config.gradient_fraction,
            min_support_fraction: config.min_support_fraction,
            max_tilt_deg: config.max_tilt_deg,
            inlier_tolerance_px: config.inlier_tolerance_px,
            contact_band_px: config.contact_band_px,
            min_contact_width_px: config.min_contact_width_px,
            ..Default::default()
        }
    }
}

impl From<&SplittingConfig> for ApexSplitter {
    fn from(config: &SplittingConfig) -> Self {
        Self {
            max_branch_points: config.max_branch_points,
            min_branch_points: config.min_branch_points,
        }
    }
}

impl From<&FittingConfig> for TangentFitter {
    fn from(config: &FittingConfig) -> Self {
        Self {
            strategy: config.strategy,
            sphericity_tolerance_px: config.sphericity_tolerance_px,
            sphericity_window_fraction: config.sphericity_window_fraction,
            max_sphericity_gap_deg: config.max_sphericity_gap_deg,
            max_residual_px: config.max_residual_px,
            poly_degree: config.poly_degree,
            poly_height_px: config.poly_height_px,
            poly_height_fraction: config.poly_height_fraction,
            max_iterations: config.max_iterations,
        }
    }
}
