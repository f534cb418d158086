pub mod builder;

use std::path::Path;

use crate::{
    error::{AngleError, MeasurementError, Result},
    io,
    traits::{AngleFitter, BaselineDetector, ContourSplitter, EdgeExtractor},
    types::{AngleResult, Baseline, Contour, ContourBranch, PixelGrid, SideMeasurement, Stage},
};

/// Progress of one measurement. Each call to [`ContactAngleEngine::advance`]
/// runs exactly one component and moves to the next state, or to `Failed`.
#[derive(Debug)]
pub enum MeasurementState<'g> {
    Loaded {
        grid: &'g PixelGrid,
    },
    EdgeExtracted {
        grid: &'g PixelGrid,
        contour: Contour,
    },
    BaselineFound {
        contour: Contour,
        baseline: Baseline,
    },
    Split {
        baseline: Baseline,
        left: ContourBranch,
        right: ContourBranch,
    },
    Fitted {
        left: Result<SideMeasurement>,
        right: Result<SideMeasurement>,
    },
    Done(AngleResult),
    Failed {
        stage: Stage,
        reason: AngleError,
    },
}

impl MeasurementState<'_> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::EdgeExtracted { .. } => "edge_extracted",
            Self::BaselineFound { .. } => "baseline_found",
            Self::Split { .. } => "split",
            Self::Fitted { .. } => "fitted",
            Self::Done(_) => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Most decimal places a reported angle can be rounded to
pub const MAX_PRECISION: u32 = 6;

/// Image to contact angle, one component per stage.
pub struct ContactAngleEngine {
    extractor: Box<dyn EdgeExtractor>,
    baseline_detector: Box<dyn BaselineDetector>,
    splitter: Box<dyn ContourSplitter>,
    fitter: Box<dyn AngleFitter>,
    precision: u32,
}

impl Default for ContactAngleEngine {
    fn default() -> Self {
        builder::EngineBuilder::new().build()
    }
}

impl ContactAngleEngine {
    pub fn builder() -> builder::EngineBuilder {
        builder::EngineBuilder::new()
    }

    pub fn new(
        extractor: Box<dyn EdgeExtractor>,
        baseline_detector: Box<dyn BaselineDetector>,
        splitter: Box<dyn ContourSplitter>,
        fitter: Box<dyn AngleFitter>,
        precision: u32,
    ) -> Self {
        if precision > MAX_PRECISION {
            tracing::warn!(precision, max = MAX_PRECISION, "precision capped");
        }
        Self {
            extractor,
            baseline_detector,
            splitter,
            fitter,
            precision: precision.min(MAX_PRECISION),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Decode the image at `path` and measure it
    pub fn measure(&self, path: &Path) -> std::result::Result<AngleResult, MeasurementError> {
        let name = io::image_name(path);
        let grid = io::load_grid(path).map_err(|reason| {
            tracing::warn!(image = %name, %reason, "could not load image");
            MeasurementError::new(Stage::Loading, name.clone(), reason)
        })?;
        self.measure_grid(&grid, &name)
    }

    /// Run the state machine on an already decoded grid until it settles
    pub fn measure_grid(&self, grid: &PixelGrid, image: &str) -> std::result::Result<AngleResult, MeasurementError> {
        let mut state = MeasurementState::Loaded { grid };
        loop {
            state = match state {
                MeasurementState::Done(result) => {
                    tracing::info!(image, angle = result.angle_deg, "contact angle measured");
                    return Ok(result);
                }
                MeasurementState::Failed { stage, reason } => {
                    tracing::warn!(image, %stage, %reason, "measurement failed");
                    return Err(MeasurementError::new(stage, image, reason));
                }
                state => {
                    let from = state.name();
                    let next = self.advance(state);
                    tracing::debug!(image, from, to = next.name(), "state transition");
                    next
                }
            };
        }
    }

    /// Perform a single transition. Terminal states are returned unchanged.
    pub fn advance<'g>(&self, state: MeasurementState<'g>) -> MeasurementState<'g> {
        use MeasurementState::*;

        match state {
            Loaded { grid } => match self.extractor.extract(grid) {
                Ok(contour) => EdgeExtracted { grid, contour },
                Err(reason) => Failed {
                    stage: Stage::EdgeExtraction,
                    reason,
                },
            },
            EdgeExtracted { grid, contour } => match self.baseline_detector.detect(grid, &contour) {
                Ok(baseline) => BaselineFound { contour, baseline },
                Err(reason) => Failed {
                    stage: Stage::BaselineDetection,
                    reason,
                },
            },
            BaselineFound { contour, baseline } => match self.splitter.split(&contour, &baseline) {
                Ok((left, right)) => Split { baseline, left, right },
                Err(reason) => Failed {
                    stage: Stage::Splitting,
                    reason,
                },
            },
            Split { baseline, left, right } => Fitted {
                left: self.fitter.fit(&left, &baseline),
                right: self.fitter.fit(&right, &baseline),
            },
            Fitted { left, right } => self.combine(left, right),
            terminal => terminal,
        }
    }

    fn combine<'g>(&self, left: Result<SideMeasurement>, right: Result<SideMeasurement>) -> MeasurementState<'g> {
        let (angle, left, right) = match (left, right) {
            (Ok(l), Ok(r)) => ((l.angle_deg + r.angle_deg) / 2.0, Some(l), Some(r)),
            (Ok(l), Err(reason)) => {
                tracing::debug!(%reason, "right side unusable, reporting left only");
                (l.angle_deg, Some(l), None)
            }
            (Err(reason), Ok(r)) => {
                tracing::debug!(%reason, "left side unusable, reporting right only");
                (r.angle_deg, None, Some(r))
            }
            (Err(reason), Err(_)) => {
                return MeasurementState::Failed {
                    stage: Stage::Fitting,
                    reason,
                };
            }
        };
        MeasurementState::Done(AngleResult {
            angle_deg: round_to(angle, self.precision),
            left,
            right,
        })
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::{FitStrategy, TangentFitter},
        error::FailureKind,
        synthetic::{FlattenedDrop, SessileDrop},
        types::{BaselineSource, FitModel, Side},
    };
    use image::{GrayImage, Luma};

    fn measure(drop: &SessileDrop) -> std::result::Result<AngleResult, MeasurementError> {
        ContactAngleEngine::default().measure_grid(&drop.grid(), "synthetic")
    }

    #[test]
    fn synthetic_drops_measure_within_one_degree() {
        for angle in (10..=170).step_by(10) {
            let angle = f64::from(angle);
            let result = measure(&SessileDrop::new(angle)).unwrap();
            assert!(
                (result.angle_deg - angle).abs() <= 1.0,
                "expected {angle}, measured {}",
                result.angle_deg
            );
        }
    }

    #[test]
    fn symmetric_drop_sides_agree() {
        for angle in [30.0, 75.0, 120.0, 150.0] {
            let result = measure(&SessileDrop::new(angle)).unwrap();
            let left = result.side(Side::Left).unwrap().angle_deg;
            let right = result.side(Side::Right).unwrap().angle_deg;
            assert!((left - right).abs() <= 0.5, "{angle}: left {left}, right {right}");
        }
    }

    #[test]
    fn mirroring_swaps_sides() {
        let drop = SessileDrop {
            center_x: SessileDrop::new(70.0).center_x + 0.3,
            ..SessileDrop::new(70.0)
        };
        let grid = drop.grid();
        let engine = ContactAngleEngine::default();
        let original = engine.measure_grid(&grid, "original").unwrap();
        let mirrored = engine.measure_grid(&grid.mirrored(), "mirrored").unwrap();

        let left = |r: &AngleResult| r.side(Side::Left).unwrap().angle_deg;
        let right = |r: &AngleResult| r.side(Side::Right).unwrap().angle_deg;
        assert!((left(&mirrored) - right(&original)).abs() < 0.05);
        assert!((right(&mirrored) - left(&original)).abs() < 0.05);
        assert!((mirrored.angle_deg - original.angle_deg).abs() <= 0.1);
    }

    #[test]
    fn profile_classes() {
        let hemisphere = measure(&SessileDrop::new(90.0)).unwrap();
        assert!((hemisphere.angle_deg - 90.0).abs() <= 1.0);

        let flattened = measure(&SessileDrop::new(25.0)).unwrap();
        assert!(flattened.angle_deg < 45.0);

        let beaded = measure(&SessileDrop::new(155.0)).unwrap();
        assert!(beaded.angle_deg > 135.0);
    }

    #[test]
    fn measuring_twice_is_identical() {
        let grid = SessileDrop::new(110.0).grid();
        let engine = ContactAngleEngine::default();
        let first = engine.measure_grid(&grid, "a").unwrap();
        let second = engine.measure_grid(&grid, "a").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn drop_on_visible_substrate_uses_surface_edge() {
        let engine = ContactAngleEngine::default();
        let dark = (10..=170).step_by(10).map(|angle| (f64::from(angle), 40));
        let gray = [(20.0, 110), (45.0, 110)];
        for (angle, level) in dark.chain(gray) {
            let grid = SessileDrop::new(angle).with_substrate_level(level).grid();

            let mut state = MeasurementState::Loaded { grid: &grid };
            while !matches!(state, MeasurementState::BaselineFound { .. }) {
                assert!(!state.is_terminal(), "stopped at {state:?}");
                state = engine.advance(state);
            }
            let MeasurementState::BaselineFound { baseline, .. } = &state else {
                unreachable!()
            };
            assert_eq!(baseline.source, BaselineSource::SurfaceEdge);

            let result = engine.measure_grid(&grid, "merged").unwrap();
            assert!(
                (result.angle_deg - angle).abs() <= 1.0,
                "{angle} on {level}: {}",
                result.angle_deg
            );
        }
    }

    #[test]
    fn flattened_drop_is_measured_at_the_contact() {
        let drop = FlattenedDrop::new(200.0, 100.0, 40.0);
        let result = ContactAngleEngine::default().measure_grid(&drop.grid(), "flat").unwrap();

        for side in [Side::Left, Side::Right] {
            assert_eq!(result.side(side).unwrap().model, FitModel::Polynomial);
        }
        assert!(
            (result.angle_deg - drop.contact_angle_deg()).abs() <= 1.5,
            "expected {:.2}, measured {}",
            drop.contact_angle_deg(),
            result.angle_deg
        );
    }

    #[test]
    fn polynomial_strategy_tracks_circle() {
        let engine = ContactAngleEngine::builder()
            .set_fitter(TangentFitter {
                strategy: FitStrategy::Polynomial,
                ..Default::default()
            })
            .build();
        for angle in [60.0, 120.0] {
            let result = engine.measure_grid(&SessileDrop::new(angle).grid(), "poly").unwrap();
            assert_eq!(result.left.as_ref().unwrap().model, FitModel::Polynomial);
            assert!((result.angle_deg - angle).abs() <= 3.0, "{angle}: {}", result.angle_deg);
        }
    }

    #[test]
    fn blank_image_has_no_droplet() {
        let grid = PixelGrid::new(GrayImage::from_pixel(320, 240, Luma([200u8])));
        let err = ContactAngleEngine::default().measure_grid(&grid, "blank.jpg").unwrap_err();
        assert_eq!(err.stage, Stage::EdgeExtraction);
        assert_eq!(err.kind(), FailureKind::NoDropletFound);
        assert_eq!(err.image, "blank.jpg");
    }

    #[test]
    fn frame_cut_drop_fails_in_splitting() {
        let drop = SessileDrop {
            center_x: 60.0,
            ..SessileDrop::new(90.0)
        };
        let err = measure(&drop).unwrap_err();
        assert_eq!(err.stage, Stage::Splitting);
        assert_eq!(err.kind(), FailureKind::DegenerateBranch);
    }

    #[test]
    fn pointed_silhouette_fails_baseline() {
        let grid = PixelGrid::new(GrayImage::from_fn(300, 200, |x, y| {
            let d = (i64::from(x) - 150).abs() + (i64::from(y) - 100).abs();
            if d <= 60 { Luma([40u8]) } else { Luma([220u8]) }
        }));
        let err = ContactAngleEngine::default().measure_grid(&grid, "diamond").unwrap_err();
        assert_eq!(err.stage, Stage::BaselineDetection);
        assert_eq!(err.kind(), FailureKind::BaselineNotFound);
    }

    /// Delegates to the default fitter but always fails on `broken`
    struct OneSided {
        broken: Vec<Side>,
    }

    impl AngleFitter for OneSided {
        fn fit(&self, branch: &ContourBranch, baseline: &Baseline) -> Result<SideMeasurement> {
            if self.broken.contains(&branch.side) {
                return Err(AngleError::FitDidNotConverge {
                    side: branch.side,
                    residual_px: 9.0,
                    limit_px: 1.5,
                });
            }
            TangentFitter::default().fit(branch, baseline)
        }
    }

    #[test]
    fn single_failed_side_falls_back_to_other() {
        let engine = ContactAngleEngine::builder()
            .set_fitter(OneSided {
                broken: vec![Side::Left],
            })
            .build();
        let result = engine.measure_grid(&SessileDrop::new(80.0).grid(), "one").unwrap();
        let right = result.right.as_ref().unwrap();
        assert!(result.left.is_none());
        assert_eq!(result.angle_deg, round_to(right.angle_deg, 1));
    }

    #[test]
    fn both_sides_failing_is_a_fit_failure() {
        let engine = ContactAngleEngine::builder()
            .set_fitter(OneSided {
                broken: vec![Side::Left, Side::Right],
            })
            .build();
        let err = engine.measure_grid(&SessileDrop::new(80.0).grid(), "none").unwrap_err();
        assert_eq!(err.stage, Stage::Fitting);
        assert!(matches!(err.reason, AngleError::FitDidNotConverge { side: Side::Left, .. }));
    }

    #[test]
    fn precision_controls_rounding() {
        let grid = SessileDrop::new(65.0).grid();
        let coarse = ContactAngleEngine::builder().with_precision(0).build();
        let fine = ContactAngleEngine::builder().with_precision(3).build();

        let whole = coarse.measure_grid(&grid, "p").unwrap().angle_deg;
        assert_eq!(whole, whole.round());
        let precise = fine.measure_grid(&grid, "p").unwrap().angle_deg;
        assert!((precise - whole).abs() <= 0.5);
        assert!((precise * 1000.0 - (precise * 1000.0).round()).abs() < 1e-6);
    }

    #[test]
    fn precision_is_capped() {
        let engine = ContactAngleEngine::builder().with_precision(400).build();
        assert_eq!(engine.precision(), MAX_PRECISION);

        let angle = engine.measure_grid(&SessileDrop::new(65.0).grid(), "p").unwrap().angle_deg;
        assert!(angle.is_finite());
        assert!((angle - 65.0).abs() <= 1.0);
    }

    #[test]
    fn missing_file_fails_while_loading() {
        let err = ContactAngleEngine::default()
            .measure(Path::new("does/not/exist.jpg"))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Loading);
        assert_eq!(err.kind(), FailureKind::UnreadableImage);
        assert_eq!(err.image, "exist.jpg");
    }
}
