pub mod baseline;
pub mod extraction;
pub mod fitting;
pub mod preprocessing;
pub mod splitting;

pub use baseline::SurfaceLineDetector;
pub use extraction::SilhouetteExtractor;
pub use fitting::{FitStrategy, TangentFitter};
pub use preprocessing::{ClosingPreprocessor, GaussianBlurPreprocessor, OtsuBinarizer, Polarity, ThresholdBinarizer};
pub use splitting::ApexSplitter;
