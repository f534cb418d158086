//! # Droplet Contact Angle Measurement
//!
//! Measures the contact angle a sessile droplet makes with a solid surface
//! from a single side-view image.
//!
//! ## Core Features
//!
//! - **Trait-based Stages**: silhouette extraction, baseline detection,
//!   contour splitting and tangent fitting are swappable components
//! - **Explicit State Machine**: every measurement walks
//!   `Loaded -> EdgeExtracted -> BaselineFound -> Split -> Fitted -> Done`
//!   or stops in `Failed` with the stage that gave up
//! - **Circle and Polynomial Fits**: the tangent at each contact point comes
//!   from a geometric circle fit, or a low-order polynomial for flattened
//!   or asymmetric drops
//! - **Batch Runs**: folders or file lists measured concurrently on tokio
//!   blocking workers with per-image timeouts and progress events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! let result = droplet::measure(Path::new("drop.jpg"))?;
//! println!("Contact angle: {:.1} degrees", result.angle_deg);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Engine
//!
//! ```rust,no_run
//! use droplet::{ContactAngleEngine, FitStrategy, TangentFitter};
//!
//! let engine = ContactAngleEngine::builder()
//!     .set_fitter(TangentFitter {
//!         strategy: FitStrategy::Polynomial,
//!         ..Default::default()
//!     })
//!     .with_precision(2)
//!     .build();
//! let result = engine.measure(std::path::Path::new("drop.jpg"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod algorithms;
pub mod batch;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod synthetic;
pub mod traits;
pub mod types;

use std::path::Path;

pub use algorithms::*;
pub use batch::{BatchEvent, BatchOptions, BatchRunner, ImageOutcome};
pub use config::EngineConfig;
pub use error::{AngleError, FailureKind, MeasurementError, Result};
pub use pipeline::{builder::EngineBuilder, ContactAngleEngine, MeasurementState, MAX_PRECISION};
pub use traits::*;
pub use types::*;

/// Measure one image with the default engine
pub fn measure(path: &Path) -> std::result::Result<AngleResult, MeasurementError> {
    ContactAngleEngine::default().measure(path)
}
