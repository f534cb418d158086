use std::time::Duration;

use thiserror::Error;

use crate::types::{Side, Stage};

#[derive(Error, Debug)]
pub enum AngleError {
    #[error("Failed to decode image: {0}")]
    UnreadableImage(#[from] image::ImageError),

    #[error("No droplet found: largest region is {largest_area} px, need at least {min_area} px")]
    NoDropletFound { largest_area: u32, min_area: u32 },

    #[error("Baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("{side} branch has {points} points, need at least {min_points}")]
    DegenerateBranch {
        side: Side,
        points: usize,
        min_points: usize,
    },

    #[error("{side} fit did not converge: residual {residual_px:.3} px exceeds {limit_px:.3} px")]
    FitDidNotConverge {
        side: Side,
        residual_px: f64,
        limit_px: f64,
    },

    #[error("Measurement timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Measurement worker failed: {0}")]
    WorkerFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AngleError {
    /// Coarse category used in log lines and for matching in callers
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnreadableImage(_) => FailureKind::UnreadableImage,
            Self::NoDropletFound { .. } => FailureKind::NoDropletFound,
            Self::BaselineNotFound(_) => FailureKind::BaselineNotFound,
            Self::DegenerateBranch { .. } => FailureKind::DegenerateBranch,
            Self::FitDidNotConverge { .. } => FailureKind::FitDidNotConverge,
            Self::TimedOut(_) => FailureKind::TimedOut,
            Self::WorkerFailed(_) => FailureKind::WorkerFailed,
            Self::InvalidConfig(_) | Self::Serialization(_) | Self::Toml(_) | Self::Io(_) => {
                FailureKind::Configuration
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum FailureKind {
    UnreadableImage,
    NoDropletFound,
    BaselineNotFound,
    DegenerateBranch,
    FitDidNotConverge,
    TimedOut,
    WorkerFailed,
    Configuration,
}

/// A failed measurement: which stage stopped, on which image, and why.
#[derive(Error, Debug)]
#[error("{stage} failed for {image}: {reason}")]
pub struct MeasurementError {
    pub stage: Stage,
    pub image: String,
    #[source]
    pub reason: AngleError,
}

impl MeasurementError {
    pub fn new(stage: Stage, image: impl Into<String>, reason: AngleError) -> Self {
        Self {
            stage,
            image: image.into(),
            reason,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.reason.kind()
    }
}

pub type Result<T> = std::result::Result<T, AngleError>;
