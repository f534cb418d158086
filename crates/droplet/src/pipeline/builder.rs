use crate::{
    algorithms::{ApexSplitter, SilhouetteExtractor, SurfaceLineDetector, TangentFitter},
    config::EngineConfig,
    error::Result,
    pipeline::ContactAngleEngine,
    traits::{AngleFitter, BaselineDetector, ContourSplitter, EdgeExtractor},
};

/// Builder for the measurement engine with a fluent API.
/// Unset stages fall back to their default implementation.
pub struct EngineBuilder {
    extractor: Option<Box<dyn EdgeExtractor>>,
    baseline_detector: Option<Box<dyn BaselineDetector>>,
    splitter: Option<Box<dyn ContourSplitter>>,
    fitter: Option<Box<dyn AngleFitter>>,
    precision: u32,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            extractor: None,
            baseline_detector: None,
            splitter: None,
            fitter: None,
            precision: EngineConfig::default().precision,
        }
    }

    /// Builder preloaded with the components a config describes
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new()
            .set_extractor(SilhouetteExtractor::from(&config.extraction))
            .set_baseline_detector(SurfaceLineDetector::from(&config.baseline))
            .set_splitter(ApexSplitter::from(&config.splitting))
            .set_fitter(TangentFitter::from(&config.fitting))
            .with_precision(config.precision))
    }

    /// Set the edge extractor (replaces any existing one)
    pub fn set_extractor<E>(mut self, extractor: E) -> Self
    where
        E: EdgeExtractor + 'static,
    {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Set the baseline detector (replaces any existing one)
    pub fn set_baseline_detector<B>(mut self, detector: B) -> Self
    where
        B: BaselineDetector + 'static,
    {
        self.baseline_detector = Some(Box::new(detector));
        self
    }

    pub fn set_splitter<S>(mut self, splitter: S) -> Self
    where
        S: ContourSplitter + 'static,
    {
        self.splitter = Some(Box::new(splitter));
        self
    }

    pub fn set_fitter<F>(mut self, fitter: F) -> Self
    where
        F: AngleFitter + 'static,
    {
        self.fitter = Some(Box::new(fitter));
        self
    }

    /// Decimal places of the reported angle
    /// Decimal places of the reported angle, at most [`MAX_PRECISION`](crate::pipeline::MAX_PRECISION)
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Build the engine with default components where none were set
    pub fn build(self) -> ContactAngleEngine {
        ContactAngleEngine::new(
            self.extractor.unwrap_or_else(|| Box::new(SilhouetteExtractor::default())),
            self.baseline_detector
                .unwrap_or_else(|| Box::new(SurfaceLineDetector::default())),
            self.splitter.unwrap_or_else(|| Box::new(ApexSplitter::default())),
            self.fitter.unwrap_or_else(|| Box::new(TangentFitter::default())),
            self.precision,
        )
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
